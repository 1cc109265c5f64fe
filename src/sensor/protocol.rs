//! Wire formats spoken by the sensor controller.
//!
//! Two firmware generations exist:
//! - array framing: `[d0,d1,d2,d3]`
//! - object framing: `{"d":[...],"p":[...],"v":[...],"f":[...],"t":N}`
//!
//! The variant is chosen once from configuration; the decoder and tracker
//! never sniff fields to guess which one is on the line.

use crate::geometry::Point;
use crate::sensor::decoder::FrameError;
use crate::sensor::frame::{SENSOR_COUNT, SensorReading, Velocity, normalize_distance};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Framing variant of the sensor stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// `[d0,d1,d2,d3]`
    #[default]
    Array,
    /// `{"d":[...],"p":[...],"v":[...],"f":[...],"t":N}`
    Object,
}

impl ProtocolVariant {
    /// Byte that opens a frame.
    pub fn start_marker(self) -> u8 {
        match self {
            ProtocolVariant::Array => b'[',
            ProtocolVariant::Object => b'{',
        }
    }

    /// Byte that closes a frame.
    pub fn end_marker(self) -> u8 {
        match self {
            ProtocolVariant::Array => b']',
            ProtocolVariant::Object => b'}',
        }
    }

    /// Parse one delimited payload (markers included).
    ///
    /// The returned reading has sequence 0; the decoder stamps it.
    pub fn parse(self, payload: &str, max_distance: f64) -> Result<SensorReading, FrameError> {
        match self {
            ProtocolVariant::Array => parse_array(payload, max_distance),
            ProtocolVariant::Object => parse_object(payload, max_distance),
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVariant::Array => write!(f, "array"),
            ProtocolVariant::Object => write!(f, "object"),
        }
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "array" => Ok(ProtocolVariant::Array),
            "object" => Ok(ProtocolVariant::Object),
            other => Err(format!(
                "unknown protocol '{}', expected 'array' or 'object'",
                other
            )),
        }
    }
}

/// Object-framing payload as it appears on the wire.
#[derive(Debug, Deserialize)]
struct ObjectFrame {
    d: Vec<Value>,
    #[serde(default)]
    p: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
    #[serde(default)]
    f: Vec<f64>,
    #[serde(default)]
    t: Option<u64>,
}

fn classify(payload: &str, err: serde_json::Error) -> FrameError {
    use serde_json::error::Category;
    match err.classify() {
        Category::Data => FrameError::Schema {
            payload: payload.to_string(),
            reason: err.to_string(),
        },
        Category::Syntax | Category::Eof | Category::Io => FrameError::Malformed {
            payload: payload.to_string(),
            reason: err.to_string(),
        },
    }
}

fn schema(payload: &str, reason: impl Into<String>) -> FrameError {
    FrameError::Schema {
        payload: payload.to_string(),
        reason: reason.into(),
    }
}

/// Convert the four distance slots.
///
/// Numbers go through [`normalize_distance`]; `null` and strings (the
/// firmware sends `"eroare"` for a failed ping) mean no echo.
fn distances_from(
    payload: &str,
    values: &[Value],
    max_distance: f64,
) -> Result<[Option<f64>; SENSOR_COUNT], FrameError> {
    if values.len() != SENSOR_COUNT {
        return Err(schema(
            payload,
            format!("expected {} distances, got {}", SENSOR_COUNT, values.len()),
        ));
    }

    let mut distances = [None; SENSOR_COUNT];
    for (slot, value) in distances.iter_mut().zip(values) {
        *slot = match value {
            Value::Number(n) => match n.as_f64() {
                Some(raw) => normalize_distance(raw, max_distance),
                None => None,
            },
            Value::Null | Value::String(_) => None,
            other => {
                return Err(schema(
                    payload,
                    format!("distance must be a number, got {}", other),
                ));
            }
        };
    }
    Ok(distances)
}

fn parse_array(payload: &str, max_distance: f64) -> Result<SensorReading, FrameError> {
    let values: Vec<Value> = serde_json::from_str(payload).map_err(|e| classify(payload, e))?;
    let distances = distances_from(payload, &values, max_distance)?;
    Ok(SensorReading::from_distances(distances))
}

fn parse_object(payload: &str, max_distance: f64) -> Result<SensorReading, FrameError> {
    let frame: ObjectFrame = serde_json::from_str(payload).map_err(|e| classify(payload, e))?;
    let distances = distances_from(payload, &frame.d, max_distance)?;

    if frame.p.len() % 2 != 0 {
        return Err(schema(payload, "position list must hold x,y pairs"));
    }
    if frame.v.len() % 2 != 0 {
        return Err(schema(payload, "velocity list must hold vx,vy pairs"));
    }

    let positions = frame
        .p
        .chunks_exact(2)
        .map(|pair| Point::new(pair[0], pair[1]))
        .collect();
    let velocities = frame
        .v
        .chunks_exact(2)
        .map(|pair| Velocity {
            vx: pair[0],
            vy: pair[1],
        })
        .collect();

    Ok(SensorReading {
        sequence: 0,
        distances,
        positions,
        velocities,
        confidence: frame.f,
        device_time: frame.t,
    })
}
