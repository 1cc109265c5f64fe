//! Telemetry context.
//!
//! Periodically copies snapshots out of the engine and hands them to a
//! [`TelemetrySink`] as tagged frames:
//!
//! - `tracking` every tracking interval: latest reading, people, reference
//!   position and delay parameters
//! - `health` every health interval: level peaks, underruns, engine status
//! - `log` for each diagnostic entry recorded since the previous tick
//!
//! Ticks that fall behind are skipped, never bunched up.

use crate::alignment::DelayParameters;
use crate::audio::levels::LevelSummary;
use crate::engine::diagnostics::unix_millis;
use crate::engine::{DiagnosticEntry, Engine, EngineStatus};
use crate::error::Result;
use crate::geometry::Point;
use crate::sensor::frame::{SENSOR_COUNT, SensorReading};
use crate::tracking::tracker::TrackerState;
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingFrame {
    pub timestamp_ms: u64,
    pub reading: Option<SensorReading>,
    pub people_count: usize,
    pub people: Vec<Point>,
    pub reference: Point,
    pub occupied: [bool; SENSOR_COUNT],
    pub tracker: TrackerState,
    pub delay: DelayParameters,
    /// `delay` converted at the configured sample rate, `[left, right]`.
    pub delay_ms: [f64; 2],
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthFrame {
    pub timestamp_ms: u64,
    pub levels: LevelSummary,
    pub status: EngineStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryFrame {
    Tracking(TrackingFrame),
    Health(HealthFrame),
    Log(DiagnosticEntry),
}

/// Destination for telemetry frames.
pub trait TelemetrySink: Send {
    fn emit(&mut self, frame: &TelemetryFrame) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn emit(&mut self, frame: &TelemetryFrame) -> Result<()> {
        serde_json::to_writer(&mut self.writer, frame)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

/// Keeps every frame in memory; clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    frames: Arc<Mutex<Vec<TelemetryFrame>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<TelemetryFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetrySink for CollectorSink {
    fn emit(&mut self, frame: &TelemetryFrame) -> Result<()> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

pub struct Telemetry {
    engine: Arc<Engine>,
    tracking_interval: Duration,
    health_interval: Duration,
    last_log_id: u64,
}

impl Telemetry {
    pub fn new(engine: Arc<Engine>) -> Self {
        let config = &engine.config().telemetry;
        let tracking_interval = Duration::from_millis(config.tracking_interval_ms.max(1));
        let health_interval = Duration::from_millis(config.health_interval_ms.max(1));
        Self {
            engine,
            tracking_interval,
            health_interval,
            last_log_id: 0,
        }
    }

    pub fn tracking_frame(&self) -> TelemetryFrame {
        let snap = self.engine.snapshot();
        let (left_ms, right_ms) = snap.delay.as_millis(self.engine.config().audio.sample_rate);
        TelemetryFrame::Tracking(TrackingFrame {
            timestamp_ms: unix_millis(),
            reading: snap.reading.as_deref().cloned(),
            people_count: snap.people.len(),
            people: snap.people,
            reference: snap.reference,
            occupied: snap.occupied,
            tracker: snap.tracker,
            delay: snap.delay,
            delay_ms: [left_ms, right_ms],
            running: snap.running,
        })
    }

    /// Takes the level peaks accumulated since the previous call.
    pub fn health_frame(&self) -> TelemetryFrame {
        let state = self.engine.state();
        TelemetryFrame::Health(HealthFrame {
            timestamp_ms: unix_millis(),
            levels: state.levels().take_summary(),
            status: state.status(),
        })
    }

    /// Diagnostic entries recorded since the previous call.
    pub fn log_frames(&mut self) -> Vec<TelemetryFrame> {
        let entries = self.engine.diagnostics().entries_since(self.last_log_id);
        if let Some(last) = entries.last() {
            self.last_log_id = last.id;
        }
        entries.into_iter().map(TelemetryFrame::Log).collect()
    }

    /// Emit frames until `shutdown` turns true or its sender goes away.
    pub async fn run<S: TelemetrySink>(
        mut self,
        sink: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut tracking = tokio::time::interval(self.tracking_interval);
        tracking.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health = tokio::time::interval(self.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            target: "sweetspot::general",
            "Telemetry to {} every {:?} / {:?}",
            sink.name(),
            self.tracking_interval,
            self.health_interval
        );

        loop {
            tokio::select! {
                _ = tracking.tick() => {
                    for frame in self.log_frames() {
                        sink.emit(&frame)?;
                    }
                    sink.emit(&self.tracking_frame())?;
                }
                _ = health.tick() => {
                    sink.emit(&self.health_frame())?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for frame in self.log_frames() {
            sink.emit(&frame)?;
        }
        Ok(())
    }
}
