//! Presence tracking: calibration, occupancy and reference position.

pub mod clock;
pub mod tracker;

pub use clock::{Clock, MockClock, SystemClock};
pub use tracker::{PresenceTracker, TrackerState, TrackingUpdate};
