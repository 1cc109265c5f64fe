//! Sensor side: transports, framing and validated readings.

pub mod decoder;
pub mod frame;
pub mod link;
pub mod protocol;

pub use decoder::{Decoded, FrameDecoder, FrameError};
pub use frame::{SENSOR_COUNT, SensorId, SensorReading, Velocity};
pub use link::{ReplayLink, ScriptStep, ScriptedLink, SensorLink, discover_port};
pub use protocol::ProtocolVariant;

#[cfg(feature = "serial")]
pub use link::SerialLink;
