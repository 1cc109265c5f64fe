//! Validated sensor readings.

use crate::geometry::{Point, Room};
use serde::Serialize;

/// Number of range sensors in the installation.
pub const SENSOR_COUNT: usize = 4;

/// One of the four fixed-direction range sensors.
///
/// The discriminant is the sensor's index in every distance array on the
/// wire: right, left, front, back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    /// Mounted on the right wall, measuring towards −x.
    Right = 0,
    /// Mounted on the left wall, measuring towards +x.
    Left = 1,
    /// Mounted on the front wall, measuring towards +y.
    Front = 2,
    /// Mounted on the back wall, measuring towards −y.
    Back = 3,
}

impl SensorId {
    pub const ALL: [SensorId; SENSOR_COUNT] = [
        SensorId::Right,
        SensorId::Left,
        SensorId::Front,
        SensorId::Back,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The sensor on the opposite wall.
    pub fn opposite(self) -> SensorId {
        match self {
            SensorId::Right => SensorId::Left,
            SensorId::Left => SensorId::Right,
            SensorId::Front => SensorId::Back,
            SensorId::Back => SensorId::Front,
        }
    }

    /// Where an echo at `distance` puts a person, assuming they stand on the
    /// sensor's axis through the room centre.
    pub fn locate(self, distance: f64, room: &Room) -> Point {
        let p = match self {
            SensorId::Right => Point::new(room.width - distance, room.height / 2.0),
            SensorId::Left => Point::new(distance, room.height / 2.0),
            SensorId::Front => Point::new(room.width / 2.0, distance),
            SensorId::Back => Point::new(room.width / 2.0, room.height - distance),
        };
        room.clamp(p)
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorId::Right => "right",
            SensorId::Left => "left",
            SensorId::Front => "front",
            SensorId::Back => "back",
        }
    }
}

/// Velocity of a detection reported by the sensor controller, in cm/s.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
}

/// A complete frame from the sensor controller.
///
/// Distances are in centimetres within `[0, max_distance]`; `None` marks a
/// sensor that reported no echo. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// Decoder-assigned, strictly increasing.
    pub sequence: u64,
    pub distances: [Option<f64>; SENSOR_COUNT],
    /// Person positions computed on the controller (object framing only).
    pub positions: Vec<Point>,
    pub velocities: Vec<Velocity>,
    pub confidence: Vec<f64>,
    /// Controller clock, when the frame carries one.
    pub device_time: Option<u64>,
}

impl SensorReading {
    /// A reading carrying only distances.
    pub fn from_distances(distances: [Option<f64>; SENSOR_COUNT]) -> Self {
        Self {
            sequence: 0,
            distances,
            positions: Vec::new(),
            velocities: Vec::new(),
            confidence: Vec::new(),
            device_time: None,
        }
    }

    pub fn distance(&self, sensor: SensorId) -> Option<f64> {
        self.distances[sensor.index()]
    }

    /// True when at least one sensor reported an echo.
    pub fn has_valid_distance(&self) -> bool {
        self.distances.iter().any(Option::is_some)
    }
}

/// Map a raw wire distance into the valid range.
///
/// Negative or non-finite values are the "no echo" sentinel; values beyond
/// the sensor's range are clamped to it.
pub fn normalize_distance(raw: f64, max_distance: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 {
        None
    } else {
        Some(raw.min(max_distance))
    }
}
