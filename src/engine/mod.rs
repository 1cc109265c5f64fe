//! The coordinator.
//!
//! [`Engine`] owns the shared state and the two long-lived contexts that
//! write to it: ingestion (sensor → tracker → alignment) and the audio path
//! (device → delay line → device). Telemetry only reads snapshots.
//!
//! `start()` and `stop()` control the audio path and are idempotent.
//! Ingestion runs independently from `spawn_ingestion()` until `shutdown()`.

pub mod audio_path;
pub mod diagnostics;
pub mod ingest;
pub mod state;

pub use diagnostics::{Category, DiagnosticEntry, DiagnosticLog, Severity};
pub use ingest::Ingestor;
pub use state::{DelayCell, EngineStatus, SharedState, Snapshot};

use crate::alignment::AlignmentController;
use crate::audio::device::AudioBackend;
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, SweetspotError};
use crate::geometry::Room;
use crate::sensor::link::SensorLink;
use crate::tracking::clock::Clock;
use audio_path::AudioPath;
use crossbeam_channel::bounded;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SLEEP_STEP: Duration = Duration::from_millis(50);

/// Sleep for `duration`, waking early once `running` goes false.
pub(crate) fn sleep_while_running(duration: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_STEP.min(deadline - now));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A context thread and the flag that keeps it going.
struct ContextHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ContextHandle {
    fn is_alive(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.thread.is_finished()
    }

    /// Signal and wait. Panics are reported, not propagated.
    fn stop(self, name: &str, state: &SharedState) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(payload) = self.thread.join() {
            state.diagnostics().error(
                Category::General,
                format!("{} thread panicked: {}", name, panic_message(payload.as_ref())),
            );
        }
    }
}

pub struct Engine {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    state: Arc<SharedState>,
    /// Held across the whole of `start()` and `stop()`. Status readers go
    /// through `state` instead.
    audio: Mutex<Option<ContextHandle>>,
    ingest: Mutex<Option<ContextHandle>>,
}

impl Engine {
    pub fn new(config: Config, backend: Arc<dyn AudioBackend>) -> Self {
        let room = Room::from_config(&config.room);
        let idle = AlignmentController::from_config(&config).idle();
        let state = Arc::new(SharedState::new(
            room.center(),
            idle,
            defaults::DIAGNOSTIC_CAPACITY,
        ));
        Self {
            config,
            backend,
            state,
            audio: Mutex::new(None),
            ingest: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &dyn AudioBackend {
        self.backend.as_ref()
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        self.state.diagnostics()
    }

    pub fn status(&self) -> EngineStatus {
        self.state.status()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Start reading `link` on the ingestion thread.
    pub fn spawn_ingestion<L: SensorLink + 'static>(&self, link: L) -> Result<()> {
        self.spawn_ingestor(Ingestor::new(link, &self.config, self.state()))
    }

    /// Start a prepared ingestor, replacing any running one.
    pub fn spawn_ingestor<L, C>(&self, ingestor: Ingestor<L, C>) -> Result<()>
    where
        L: SensorLink + 'static,
        C: Clock + 'static,
    {
        let mut slot = lock(&self.ingest);
        if let Some(previous) = slot.take() {
            previous.stop("ingestion", &self.state);
        }
        let running = Arc::new(AtomicBool::new(true));
        let thread = ingestor.spawn(Arc::clone(&running))?;
        *slot = Some(ContextHandle { running, thread });
        Ok(())
    }

    pub fn is_ingesting(&self) -> bool {
        lock(&self.ingest).as_ref().is_some_and(ContextHandle::is_alive)
    }

    pub fn stop_ingestion(&self) {
        if let Some(handle) = lock(&self.ingest).take() {
            handle.stop("ingestion", &self.state);
        }
    }

    /// Open the audio devices and start the block loop.
    ///
    /// Returns `Ok(true)` once running; calling it again while running does
    /// nothing. Errors are limited to what prevents opening the devices, and
    /// leave the engine stopped and ready for another attempt.
    pub fn start(&self) -> Result<bool> {
        let mut slot = lock(&self.audio);
        if slot.as_ref().is_some_and(ContextHandle::is_alive) {
            tracing::debug!(target: "sweetspot::general", "start() while running, ignored");
            return Ok(true);
        }
        // A path that gave up on its own still has a thread to collect.
        if let Some(stale) = slot.take() {
            stale.stop("audio", &self.state);
        }

        self.state.set_status(EngineStatus::Starting);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded(1);
        let path = AudioPath::new(
            Arc::clone(&self.backend),
            &self.config,
            self.state(),
            Arc::clone(&running),
        );
        let thread = match path.spawn(ready_tx) {
            Ok(thread) => thread,
            Err(e) => {
                self.fail_start(&e);
                return Err(e);
            }
        };

        let timeout = Duration::from_millis(self.config.audio.start_timeout_ms);
        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(description)) => {
                self.state.diagnostics().info(
                    Category::General,
                    format!("Audio path started ({}: {})", self.backend.name(), description),
                );
                *slot = Some(ContextHandle { running, thread });
                Ok(true)
            }
            Ok(Err(e)) => {
                ContextHandle { running, thread }.stop("audio", &self.state);
                self.fail_start(&e);
                Err(e)
            }
            Err(_) => {
                // The thread is stuck inside the backend; leave it detached.
                // If the open completes later the thread closes the streams.
                let e = SweetspotError::AudioDevice {
                    message: format!("devices did not open within {:?}", timeout),
                };
                self.state
                    .diagnostics()
                    .error(Category::General, format!("Start failed: {}", e));
                self.state.abandon_start(&running, e.to_string());
                Err(e)
            }
        }
    }

    fn fail_start(&self, error: &SweetspotError) {
        self.state
            .diagnostics()
            .error(Category::General, format!("Start failed: {}", error));
        self.state.set_status(EngineStatus::Failed {
            reason: error.to_string(),
        });
    }

    /// Halt the block loop, then close the devices. Always returns `false`,
    /// the resulting running state.
    pub fn stop(&self) -> bool {
        let mut slot = lock(&self.audio);
        match slot.take() {
            Some(handle) => {
                handle.stop("audio", &self.state);
                if !matches!(self.state.status(), EngineStatus::Failed { .. }) {
                    self.state.set_status(EngineStatus::Stopped);
                }
                self.state
                    .diagnostics()
                    .info(Category::General, "Audio path stopped");
            }
            None => {
                tracing::debug!(target: "sweetspot::general", "stop() while stopped, ignored");
            }
        }
        false
    }

    /// Flip the audio path; returns the resulting running state.
    pub fn toggle(&self) -> Result<bool> {
        if self.is_running() {
            Ok(self.stop())
        } else {
            self.start()
        }
    }

    /// Lock-free; never waits on a `start()` or `stop()` in progress.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Stop both contexts.
    pub fn shutdown(&self) {
        self.stop();
        self.stop_ingestion();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
