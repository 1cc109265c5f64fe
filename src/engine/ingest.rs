//! Ingestion context: sensor bytes in, published tracking state out.
//!
//! Runs on its own thread for the life of the engine. Transport failures are
//! retried forever with a fixed backoff; a panic anywhere below `run` is
//! caught by the watchdog, logged, and the loop restarts with the tracker's
//! calibration intact.

use crate::alignment::AlignmentController;
use crate::config::Config;
use crate::engine::diagnostics::Category;
use crate::engine::state::SharedState;
use crate::engine::{panic_message, sleep_while_running};
use crate::error::{Result, SweetspotError};
use crate::sensor::decoder::{Decoded, FrameDecoder};
use crate::sensor::link::SensorLink;
use crate::tracking::clock::{Clock, SystemClock};
use crate::tracking::tracker::{PresenceTracker, TrackerState};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_BUFFER_BYTES: usize = 256;

pub struct Ingestor<L: SensorLink, C: Clock = SystemClock> {
    link: L,
    decoder: FrameDecoder,
    tracker: PresenceTracker<C>,
    aligner: AlignmentController,
    state: Arc<SharedState>,
    backoff: Duration,
    buffer: Vec<u8>,
    connected: bool,
    last_tracker_state: TrackerState,
    last_people: usize,
}

impl<L: SensorLink> Ingestor<L, SystemClock> {
    pub fn new(link: L, config: &Config, state: Arc<SharedState>) -> Self {
        Self::with_tracker(link, PresenceTracker::from_config(config), config, state)
    }
}

impl<L: SensorLink, C: Clock> Ingestor<L, C> {
    pub fn with_tracker(
        link: L,
        tracker: PresenceTracker<C>,
        config: &Config,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            link,
            decoder: FrameDecoder::from_config(config),
            last_tracker_state: tracker.state(),
            tracker,
            aligner: AlignmentController::from_config(config),
            state,
            backoff: Duration::from_millis(config.sensor.reconnect_backoff_ms),
            buffer: vec![0; READ_BUFFER_BYTES],
            connected: false,
            last_people: 0,
        }
    }

    pub fn tracker(&self) -> &PresenceTracker<C> {
        &self.tracker
    }

    /// Decode `bytes` and publish every reading they complete.
    pub fn feed(&mut self, bytes: &[u8]) {
        for decoded in self.decoder.push(bytes) {
            match decoded {
                Decoded::Reading(reading) => self.publish(reading),
                Decoded::Rejected(err) => self
                    .state
                    .diagnostics()
                    .warn(Category::Sensor, format!("Discarded frame: {}", err)),
            }
        }
    }

    fn publish(&mut self, reading: crate::sensor::frame::SensorReading) {
        let update = self.tracker.update(&reading);
        let params = self.aligner.compute(&update.people, update.reference);
        self.state.publish(Arc::new(reading), &update, params);

        let diagnostics = self.state.diagnostics();
        if update.state != self.last_tracker_state {
            if update.state == TrackerState::Operational {
                let baselines: Vec<String> = self
                    .tracker
                    .baselines()
                    .iter()
                    .map(|b| b.map_or_else(|| "-".to_string(), |v| format!("{:.0}", v)))
                    .collect();
                diagnostics.info(
                    Category::Tracking,
                    format!("Calibration complete, baselines [{}] cm", baselines.join(", ")),
                );
            } else {
                diagnostics.info(Category::Tracking, "Calibrating sensor baselines");
            }
            self.last_tracker_state = update.state;
        }

        if update.people.len() != self.last_people {
            match update.people.first() {
                Some(person) => diagnostics.info(
                    Category::Tracking,
                    format!(
                        "Listener at ({:.0}, {:.0}) cm, delay L{} R{} samples",
                        person.x, person.y, params.left, params.right
                    ),
                ),
                None => diagnostics.info(Category::Tracking, "Listener left, delays idle"),
            }
            self.last_people = update.people.len();
        }
    }

    /// Move the ingestor onto its own thread.
    pub fn spawn(self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>>
    where
        L: 'static,
        C: 'static,
    {
        thread::Builder::new()
            .name("sweetspot-ingest".to_string())
            .spawn(move || self.supervise(&running))
            .map_err(SweetspotError::Io)
    }

    /// Watchdog: restart `run` after a panic until asked to stop.
    pub fn supervise(mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run(running))) {
                Ok(()) => break,
                Err(payload) => {
                    self.state.diagnostics().error(
                        Category::General,
                        format!(
                            "Ingestion context died ({}); restarting in {:?}",
                            panic_message(payload.as_ref()),
                            self.backoff
                        ),
                    );
                    self.link.disconnect();
                    self.connected = false;
                    self.decoder.reset();
                    sleep_while_running(self.backoff, running);
                }
            }
        }
        self.link.disconnect();
        tracing::debug!(target: "sweetspot::sensor", "Ingestion context stopped");
    }

    /// Read until stopped or a finite source runs dry.
    fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            if !self.connected {
                match self.link.connect() {
                    Ok(()) => {
                        self.connected = true;
                        self.state
                            .diagnostics()
                            .info(Category::Sensor, format!("Connected to {}", self.link.describe()));
                    }
                    Err(e) => {
                        self.state.diagnostics().warn(
                            Category::Sensor,
                            format!("{}; retrying in {:?}", e, self.backoff),
                        );
                        sleep_while_running(self.backoff, running);
                        continue;
                    }
                }
            }

            match self.link.read(&mut self.buffer) {
                Ok(0) => {
                    if self.link.is_exhausted() {
                        self.state.diagnostics().info(
                            Category::Sensor,
                            format!("{} has no more data", self.link.describe()),
                        );
                        return;
                    }
                }
                Ok(n) => {
                    // Lend the read buffer out so `feed` can borrow `self`.
                    let buffer = std::mem::take(&mut self.buffer);
                    self.feed(&buffer[..n]);
                    self.buffer = buffer;
                }
                Err(e) => {
                    self.state.diagnostics().error(
                        Category::Sensor,
                        format!("{}; reconnecting in {:?}", e, self.backoff),
                    );
                    self.link.disconnect();
                    self.connected = false;
                    self.decoder.reset();
                    sleep_while_running(self.backoff, running);
                }
            }
        }
    }
}
