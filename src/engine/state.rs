//! State shared between the ingestion, audio and telemetry contexts.
//!
//! One lock per field group, each held only for a copy:
//! - tracking: latest reading, people, occupancy, tracker state
//! - reference: the reference position, read by alignment and telemetry
//! - status: engine lifecycle
//!
//! Delay parameters, level meters and the running flag are atomics; the
//! audio context never takes a lock per block, and readers of the running
//! flag never wait behind `start()` or `stop()`.

use crate::alignment::DelayParameters;
use crate::audio::levels::LevelMeters;
use crate::engine::diagnostics::DiagnosticLog;
use crate::geometry::Point;
use crate::sensor::frame::{SENSOR_COUNT, SensorReading};
use crate::tracking::tracker::{TrackerState, TrackingUpdate};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle of the audio path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineStatus {
    Stopped,
    Starting,
    Running,
    Reinitializing { attempt: u32 },
    Failed { reason: String },
}

/// Delay parameters behind a single atomic word.
#[derive(Debug, Default)]
pub struct DelayCell(AtomicU64);

impl DelayCell {
    pub fn new(params: DelayParameters) -> Self {
        Self(AtomicU64::new(params.pack()))
    }

    pub fn load(&self) -> DelayParameters {
        DelayParameters::unpack(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, params: DelayParameters) {
        self.0.store(params.pack(), Ordering::Release);
    }
}

#[derive(Debug, Clone)]
struct TrackingGroup {
    reading: Option<Arc<SensorReading>>,
    people: Vec<Point>,
    occupied: [bool; SENSOR_COUNT],
    tracker: TrackerState,
}

/// Everything telemetry needs, copied out in one go.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub reading: Option<Arc<SensorReading>>,
    pub people: Vec<Point>,
    pub occupied: [bool; SENSOR_COUNT],
    pub tracker: TrackerState,
    pub reference: Point,
    pub delay: DelayParameters,
    pub status: EngineStatus,
    pub running: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct SharedState {
    tracking: Mutex<TrackingGroup>,
    reference: Mutex<Point>,
    status: Mutex<EngineStatus>,
    running: AtomicBool,
    delay: DelayCell,
    levels: LevelMeters,
    diagnostics: DiagnosticLog,
}

impl SharedState {
    pub fn new(reference: Point, idle: DelayParameters, diagnostic_capacity: usize) -> Self {
        Self {
            tracking: Mutex::new(TrackingGroup {
                reading: None,
                people: Vec::new(),
                occupied: [false; SENSOR_COUNT],
                tracker: TrackerState::Uninitialized,
            }),
            reference: Mutex::new(reference),
            status: Mutex::new(EngineStatus::Stopped),
            running: AtomicBool::new(false),
            delay: DelayCell::new(idle),
            levels: LevelMeters::new(),
            diagnostics: DiagnosticLog::new(diagnostic_capacity),
        }
    }

    /// Publish one detection cycle.
    pub fn publish(
        &self,
        reading: Arc<SensorReading>,
        update: &TrackingUpdate,
        params: DelayParameters,
    ) {
        {
            let mut tracking = lock(&self.tracking);
            tracking.reading = Some(reading);
            tracking.people.clone_from(&update.people);
            tracking.occupied = update.occupied;
            tracking.tracker = update.state;
        }
        *lock(&self.reference) = update.reference;
        self.delay.store(params);
    }

    pub fn latest_reading(&self) -> Option<Arc<SensorReading>> {
        lock(&self.tracking).reading.clone()
    }

    pub fn people(&self) -> Vec<Point> {
        lock(&self.tracking).people.clone()
    }

    pub fn reference(&self) -> Point {
        *lock(&self.reference)
    }

    /// Lock-free; safe from the audio context.
    pub fn delay(&self) -> DelayParameters {
        self.delay.load()
    }

    pub fn set_delay(&self, params: DelayParameters) {
        self.delay.store(params);
    }

    pub fn status(&self) -> EngineStatus {
        lock(&self.status).clone()
    }

    pub fn set_status(&self, status: EngineStatus) {
        *lock(&self.status) = status;
    }

    /// Whether an audio path is processing blocks. Lock-free.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Move to `Running` unless `keep_going` was cleared first. Checked under
    /// the status lock, so it cannot interleave with [`Self::abandon_start`].
    pub fn enter_running(&self, keep_going: &AtomicBool) -> bool {
        let mut status = lock(&self.status);
        if !keep_going.load(Ordering::SeqCst) {
            return false;
        }
        *status = EngineStatus::Running;
        self.running.store(true, Ordering::SeqCst);
        true
    }

    /// Clear `keep_going` and record the failed start in one step.
    pub fn abandon_start(&self, keep_going: &AtomicBool, reason: String) {
        let mut status = lock(&self.status);
        keep_going.store(false, Ordering::SeqCst);
        *status = EngineStatus::Failed { reason };
    }

    pub fn levels(&self) -> &LevelMeters {
        &self.levels
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn snapshot(&self) -> Snapshot {
        let tracking = lock(&self.tracking).clone();
        Snapshot {
            reading: tracking.reading,
            people: tracking.people,
            occupied: tracking.occupied,
            tracker: tracking.tracker,
            reference: self.reference(),
            delay: self.delay(),
            status: self.status(),
            running: self.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedState {
        SharedState::new(Point::new(200.0, 200.0), DelayParameters::default(), 10)
    }

    #[test]
    fn test_initial_snapshot() {
        let snap = state().snapshot();
        assert!(snap.reading.is_none());
        assert!(snap.people.is_empty());
        assert_eq!(snap.reference, Point::new(200.0, 200.0));
        assert_eq!(snap.delay, DelayParameters::new(0, 0));
        assert_eq!(snap.status, EngineStatus::Stopped);
        assert_eq!(snap.tracker, TrackerState::Uninitialized);
    }

    #[test]
    fn test_publish_replaces_everything() {
        let state = state();
        let reading = Arc::new(SensorReading::from_distances([Some(50.0); 4]));
        let update = TrackingUpdate {
            people: vec![Point::new(350.0, 200.0)],
            reference: Point::new(400.0, 400.0),
            occupied: [true, false, false, false],
            state: TrackerState::Operational,
        };
        state.publish(Arc::clone(&reading), &update, DelayParameters::new(15, 0));

        let snap = state.snapshot();
        assert_eq!(snap.reading.as_deref(), Some(reading.as_ref()));
        assert_eq!(snap.people, update.people);
        assert_eq!(snap.occupied, update.occupied);
        assert_eq!(snap.reference, Point::new(400.0, 400.0));
        assert_eq!(snap.delay, DelayParameters::new(15, 0));
        assert_eq!(snap.tracker, TrackerState::Operational);
    }

    #[test]
    fn test_delay_cell_round_trips() {
        let cell = DelayCell::new(DelayParameters::new(3, 4));
        assert_eq!(cell.load(), DelayParameters::new(3, 4));
        cell.store(DelayParameters::new(2205, 0));
        assert_eq!(cell.load(), DelayParameters::new(2205, 0));
    }

    #[test]
    fn test_delay_cell_is_consistent_across_threads() {
        let cell = Arc::new(DelayCell::default());
        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    cell.store(DelayParameters::new(i, i));
                }
            })
        };
        for _ in 0..10_000 {
            let p = cell.load();
            assert_eq!(p.left, p.right, "torn read");
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_status_updates() {
        let state = state();
        state.set_status(EngineStatus::Reinitializing { attempt: 2 });
        assert_eq!(state.status(), EngineStatus::Reinitializing { attempt: 2 });
    }

    #[test]
    fn test_enter_running_after_abandon_is_refused() {
        let state = state();
        let keep_going = AtomicBool::new(true);
        state.abandon_start(&keep_going, "devices did not open".to_string());
        assert!(!keep_going.load(Ordering::SeqCst));

        assert!(!state.enter_running(&keep_going));
        assert!(!state.is_running());
        assert!(matches!(state.status(), EngineStatus::Failed { .. }));
    }

    #[test]
    fn test_enter_running_publishes_flag() {
        let state = state();
        assert!(!state.snapshot().running);
        assert!(state.enter_running(&AtomicBool::new(true)));
        let snap = state.snapshot();
        assert!(snap.running);
        assert_eq!(snap.status, EngineStatus::Running);

        state.set_running(false);
        assert!(!state.is_running());
    }
}
