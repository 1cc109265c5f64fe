//! sweetspot - listener-tracking time alignment
//!
//! Four range sensors locate the listener; the channel of a stereo pair that
//! is nearer to them is delayed so both wavefronts arrive together.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod alignment;
pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod decode;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod sensor;
pub mod telemetry;
pub mod tracking;

// Pipeline stages (sensor → tracker → alignment → delay line)
pub use alignment::{AlignmentController, DelayParameters};
pub use audio::{DelayLine, MixPolicy};
pub use sensor::{FrameDecoder, ProtocolVariant, SensorReading};
pub use tracking::PresenceTracker;

// Coordinator
pub use engine::{Engine, EngineStatus, Snapshot};
pub use telemetry::{TelemetryFrame, TelemetrySink};

// Error handling
pub use error::{Result, SweetspotError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
