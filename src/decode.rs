//! Offline decoding of a captured sensor byte stream.
//!
//! Runs the same decoder, tracker and alignment chain as the ingestion
//! context, synchronously, and writes one JSON line per reading. Time is
//! replayed from the frames rather than read from the wall clock, so the
//! calibration timeout behaves as it did during the capture.

use crate::alignment::{AlignmentController, DelayParameters};
use crate::config::Config;
use crate::defaults;
use crate::error::Result;
use crate::geometry::Point;
use crate::sensor::decoder::{Decoded, FrameDecoder};
use crate::sensor::frame::SensorReading;
use crate::sensor::protocol::ProtocolVariant;
use crate::geometry::Room;
use crate::tracking::clock::MockClock;
use crate::tracking::tracker::{PresenceTracker, TrackerState};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct DecodedLine<'a> {
    reading: &'a SensorReading,
    tracker: TrackerState,
    people: &'a [Point],
    reference: Point,
    delay: DelayParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeSummary {
    pub readings: usize,
    pub rejected: usize,
    /// Readings with a listener present.
    pub detections: usize,
}

/// Capture time, advanced reading by reading.
///
/// Uses the controller clock (milliseconds) when consecutive frames carry
/// it, and a fixed frame period otherwise.
#[derive(Debug)]
struct ReplayClock {
    clock: MockClock,
    frame_period: Duration,
    /// Device time of the previous reading; `None` before the first.
    previous: Option<Option<u64>>,
}

impl ReplayClock {
    fn new(frame_period: Duration) -> Self {
        Self {
            clock: MockClock::new(),
            frame_period,
            previous: None,
        }
    }

    fn handle(&self) -> MockClock {
        self.clock.clone()
    }

    fn tick(&mut self, reading: &SensorReading) {
        let Some(previous) = self.previous.replace(reading.device_time) else {
            return;
        };
        let step = match (previous, reading.device_time) {
            (Some(before), Some(now)) if now >= before => Duration::from_millis(now - before),
            _ => self.frame_period,
        };
        self.clock.advance(step);
    }
}

/// Decode `bytes` as one continuous capture, writing JSON lines to `out`.
pub fn decode_capture<W: Write>(
    config: &Config,
    protocol: ProtocolVariant,
    bytes: &[u8],
    mut out: W,
) -> Result<DecodeSummary> {
    let mut decoder = FrameDecoder::new(
        protocol,
        config.room.max_distance,
        config.sensor.max_frame_bytes,
    );
    let mut replay = ReplayClock::new(Duration::from_millis(defaults::CAPTURE_FRAME_PERIOD_MS));
    let mut tracker = PresenceTracker::with_clock(
        Room::from_config(&config.room),
        config.tracking.clone(),
        replay.handle(),
    );
    let aligner = AlignmentController::from_config(config);
    let mut summary = DecodeSummary::default();

    for decoded in decoder.push(bytes) {
        match decoded {
            Decoded::Reading(reading) => {
                replay.tick(&reading);
                let update = tracker.update(&reading);
                let delay = aligner.compute(&update.people, update.reference);
                summary.readings += 1;
                if !update.people.is_empty() {
                    summary.detections += 1;
                }
                let line = DecodedLine {
                    reading: &reading,
                    tracker: update.state,
                    people: &update.people,
                    reference: update.reference,
                    delay,
                };
                serde_json::to_writer(&mut out, &line)?;
                out.write_all(b"\n")?;
            }
            Decoded::Rejected(err) => {
                summary.rejected += 1;
                tracing::warn!(target: "sweetspot::sensor", "Discarded frame: {}", err);
            }
        }
    }

    if decoder.buffered() > 0 {
        tracing::debug!(
            target: "sweetspot::sensor",
            "{} trailing bytes without a complete frame",
            decoder.buffered()
        );
    }
    out.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Clock;

    fn decode(bytes: &[u8]) -> (DecodeSummary, Vec<serde_json::Value>) {
        let mut out = Vec::new();
        let summary =
            decode_capture(&Config::default(), ProtocolVariant::Array, bytes, &mut out).unwrap();
        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (summary, lines)
    }

    #[test]
    fn test_decode_capture_tracks_listener() {
        let mut capture = "[400,400,400,400]\r\n".repeat(5);
        capture.push_str("[50,400,400,400]\r\n[50,400,400,400]\r\n");

        let (summary, lines) = decode(capture.as_bytes());
        assert_eq!(summary.readings, 7);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.detections, 1);

        let last = &lines[6];
        assert_eq!(last["tracker"], "operational");
        assert_eq!(last["people"][0]["x"], 350.0);
        assert_eq!(last["people"][0]["y"], 200.0);
        assert!(last["delay"]["left"].as_u64().unwrap() > 0);
        assert_eq!(last["delay"]["right"], 0);
    }

    #[test]
    fn test_decode_capture_counts_rejects() {
        let (summary, lines) = decode(b"garbage][1,2,3,4][1,2,x,4][5,6,7,8][9");
        assert_eq!(summary.readings, 2);
        assert!(summary.rejected >= 2);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["reading"]["sequence"], 2);
    }

    #[test]
    fn test_unstable_sensor_times_out_over_long_capture() {
        // 10 s of calibration timeout at 50 ms per frame is 200 frames.
        let capture: String = (0..250)
            .map(|i| {
                let jitter = if i % 2 == 0 { 100 } else { 180 };
                format!("[{},400,400,400]\r\n", jitter)
            })
            .collect();

        let (summary, lines) = decode(capture.as_bytes());
        assert_eq!(summary.readings, 250);
        assert_eq!(lines[150]["tracker"], "calibrating");
        assert_eq!(lines[249]["tracker"], "operational");
    }

    #[test]
    fn test_device_time_drives_calibration_timeout() {
        let capture = concat!(
            r#"{"d":[100,400,400,400],"t":1000}"#,
            r#"{"d":[180,400,400,400],"t":6000}"#,
            r#"{"d":[100,400,400,400],"t":11000}"#,
        );
        let mut out = Vec::new();
        let summary = decode_capture(
            &Config::default(),
            ProtocolVariant::Object,
            capture.as_bytes(),
            &mut out,
        )
        .unwrap();
        assert_eq!(summary.readings, 3);

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[1]["tracker"], "calibrating");
        assert_eq!(lines[2]["tracker"], "operational");
    }

    #[test]
    fn test_replay_clock_steps() {
        let mut replay = ReplayClock::new(Duration::from_millis(50));
        let clock = replay.handle();
        let start = clock.now();
        let mut reading = SensorReading::from_distances([None; 4]);

        replay.tick(&reading);
        assert_eq!(clock.now(), start);
        replay.tick(&reading);
        assert_eq!(clock.now() - start, Duration::from_millis(50));

        reading.device_time = Some(500);
        replay.tick(&reading);
        reading.device_time = Some(740);
        replay.tick(&reading);
        assert_eq!(clock.now() - start, Duration::from_millis(340));

        // A controller reset falls back to the frame period.
        reading.device_time = Some(10);
        replay.tick(&reading);
        assert_eq!(clock.now() - start, Duration::from_millis(390));
    }

    #[test]
    fn test_decode_empty_capture() {
        let (summary, lines) = decode(b"");
        assert_eq!(summary, DecodeSummary::default());
        assert!(lines.is_empty());
    }
}
