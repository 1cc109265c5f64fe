//! Audio context: one thread that owns the device streams.
//!
//! Streams are opened, used and dropped on this thread only. The block loop
//! checks the running flag between blocks and the streams are dropped after
//! it exits, so a device is never closed under an in-flight block. Recovery
//! from a device error always drops both streams and opens new ones.

use crate::audio::delay_line::DelayLine;
use crate::audio::device::{AudioBackend, AudioStreams, StreamSettings};
use crate::config::Config;
use crate::engine::diagnostics::Category;
use crate::engine::sleep_while_running;
use crate::engine::state::{EngineStatus, SharedState};
use crate::error::{Result, SweetspotError};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Backoff step between reopen attempts; attempt `n` waits `n` steps.
const REINIT_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Clears the published running flag when the path exits, panics included.
struct RunningFlag(Arc<SharedState>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

pub(crate) struct AudioPath {
    backend: Arc<dyn AudioBackend>,
    settings: StreamSettings,
    delay_line: DelayLine,
    state: Arc<SharedState>,
    running: Arc<AtomicBool>,
    max_reinit: u32,
    /// Blocks processed since the current streams were opened.
    healthy_blocks: u64,
}

impl AudioPath {
    pub(crate) fn new(
        backend: Arc<dyn AudioBackend>,
        config: &Config,
        state: Arc<SharedState>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            settings: StreamSettings::from_config(&config.audio),
            delay_line: DelayLine::from_config(config),
            state,
            running,
            max_reinit: config.audio.max_reinit_attempts,
            healthy_blocks: 0,
        }
    }

    /// Start the thread. `ready` receives the stream description once the
    /// devices are open, or the error that prevented it.
    pub(crate) fn spawn(self, ready: Sender<Result<String>>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("sweetspot-audio".to_string())
            .spawn(move || self.run(ready))
            .map_err(SweetspotError::Io)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run(mut self, ready: Sender<Result<String>>) {
        let mut streams = match self.open_initial() {
            Ok(streams) => streams,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = ready.send(Err(e));
                return;
            }
        };

        // `start()` may have given up waiting while the backend was opening.
        if !self.state.enter_running(&self.running) {
            tracing::warn!(
                target: "sweetspot::audio",
                "Audio devices opened after start() gave up, closing them"
            );
            drop(streams);
            return;
        }
        let _published = RunningFlag(Arc::clone(&self.state));
        let _ = ready.send(Ok(streams.description.clone()));

        let samples = self.settings.block_samples();
        let mut input = vec![0i16; samples];
        let mut output = vec![0i16; samples];
        let healthy_after =
            u64::from(self.settings.sample_rate) / self.settings.block_size.max(1) as u64;
        let mut failures = 0u32;

        loop {
            let error = match self.pump(&mut streams, &mut input, &mut output) {
                Ok(()) => break,
                Err(e) => e,
            };
            drop(streams);

            // A stream that ran for a while earns a fresh set of attempts.
            if self.healthy_blocks >= healthy_after {
                failures = 0;
            }
            match self.reinitialize(&mut failures, error) {
                Some(reopened) => streams = reopened,
                None => return,
            }
        }

        drop(streams);
        tracing::debug!(target: "sweetspot::audio", "Audio streams closed");
    }

    /// Process blocks until the running flag drops or a device fails.
    fn pump(
        &mut self,
        streams: &mut AudioStreams,
        input: &mut [i16],
        output: &mut [i16],
    ) -> Result<()> {
        self.healthy_blocks = 0;
        while self.is_running() {
            if !streams.input.read_block(input)? {
                continue;
            }
            let params = self.state.delay();
            self.delay_line.process(input, output, params);
            self.state.levels().record_block(input, output);
            streams.output.write_block(output)?;
            self.state
                .levels()
                .record_underruns(streams.output.take_underruns());
            self.healthy_blocks += 1;
        }
        Ok(())
    }

    /// Open at `start()`: configuration errors are final, transient ones are
    /// retried up to the reinit budget.
    fn open_initial(&self) -> Result<AudioStreams> {
        let mut attempt = 0u32;
        loop {
            match self.backend.open(&self.settings) {
                Ok(streams) => return Ok(streams),
                Err(e) if e.is_configuration() || attempt >= self.max_reinit => return Err(e),
                Err(e) => {
                    attempt += 1;
                    self.state.diagnostics().warn(
                        Category::Audio,
                        format!(
                            "Opening audio devices failed: {}; retry {}/{}",
                            e, attempt, self.max_reinit
                        ),
                    );
                    sleep_while_running(REINIT_BACKOFF_STEP * attempt, &self.running);
                    if !self.is_running() {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Reopen both streams after a failure. `None` means the path is done,
    /// either because the budget ran out or because a stop was requested.
    fn reinitialize(
        &mut self,
        failures: &mut u32,
        mut error: SweetspotError,
    ) -> Option<AudioStreams> {
        loop {
            *failures += 1;
            if *failures > self.max_reinit {
                let reason = format!(
                    "gave up after {} reinitialization attempts: {}",
                    self.max_reinit, error
                );
                self.state
                    .diagnostics()
                    .error(Category::Audio, format!("Audio path stopped, {}", reason));
                self.state.set_status(EngineStatus::Failed { reason });
                self.running.store(false, Ordering::SeqCst);
                return None;
            }

            self.state.diagnostics().error(
                Category::Audio,
                format!(
                    "Audio device error: {}; reinitializing ({}/{})",
                    error, failures, self.max_reinit
                ),
            );
            self.state.set_status(EngineStatus::Reinitializing { attempt: *failures });

            sleep_while_running(REINIT_BACKOFF_STEP * *failures, &self.running);
            if !self.is_running() {
                return None;
            }

            self.delay_line.clear();
            match self.backend.open(&self.settings) {
                Ok(streams) => {
                    self.state.set_status(EngineStatus::Running);
                    self.state.diagnostics().info(
                        Category::Audio,
                        format!("Audio devices reopened: {}", streams.description),
                    );
                    return Some(streams);
                }
                Err(e) => error = e,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::DelayParameters;
    use crate::audio::device::MockAudioBackend;
    use crate::geometry::Point;
    use crossbeam_channel::bounded;
    use std::time::Instant;

    fn config(block_size: usize, max_reinit: u32) -> Config {
        let mut config = Config::default();
        config.audio.block_size = block_size;
        config.audio.max_reinit_attempts = max_reinit;
        config
    }

    fn state() -> Arc<SharedState> {
        Arc::new(SharedState::new(
            Point::new(200.0, 200.0),
            DelayParameters::default(),
            100,
        ))
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn spawn(
        backend: &MockAudioBackend,
        config: &Config,
        state: &Arc<SharedState>,
    ) -> (Arc<AtomicBool>, JoinHandle<()>, Result<String>) {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = bounded(1);
        let path = AudioPath::new(
            Arc::new(backend.clone()),
            config,
            Arc::clone(state),
            Arc::clone(&running),
        );
        let handle = path.spawn(tx).unwrap();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        (running, handle, result)
    }

    #[test]
    fn test_blocks_flow_until_stopped() {
        let backend = MockAudioBackend::new().with_block_period(Duration::from_millis(1));
        let stats = backend.stats();
        let state = state();
        let (running, handle, result) = spawn(&backend, &config(4, 3), &state);

        assert!(result.unwrap().contains("4 frames/block"));
        assert_eq!(state.status(), EngineStatus::Running);
        assert!(wait_for(|| stats.blocks_written.load(Ordering::SeqCst) >= 5));

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(!stats.streams_open.load(Ordering::SeqCst));
        assert_eq!(stats.opens.load(Ordering::SeqCst), 1);
        assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
        assert!(state.levels().take_summary().blocks >= 5);
    }

    #[test]
    fn test_zero_delay_passes_signal_through() {
        let backend = MockAudioBackend::new()
            .with_signal(vec![100, -100, 200, -200])
            .with_block_period(Duration::from_millis(1));
        let stats = backend.stats();
        let state = state();
        let (running, handle, _) = spawn(&backend, &config(2, 3), &state);

        assert!(wait_for(|| stats.blocks_written.load(Ordering::SeqCst) >= 3));
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let written = stats.written();
        assert_eq!(&written[..8], &[100, -100, 200, -200, 100, -100, 200, -200]);
    }

    #[test]
    fn test_missing_devices_fail_immediately() {
        let backend = MockAudioBackend::new().with_no_devices();
        let state = state();
        let (running, handle, result) = spawn(&backend, &config(4, 3), &state);

        assert!(matches!(result, Err(SweetspotError::NoAudioDevices { .. })));
        handle.join().unwrap();
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(backend.stats().opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transient_open_failures_are_retried() {
        let backend = MockAudioBackend::new().with_open_failures(2);
        let state = state();
        let (running, handle, result) = spawn(&backend, &config(4, 3), &state);

        assert!(result.is_ok());
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(state.diagnostics().entries(Category::Audio).len(), 2);
    }

    #[test]
    fn test_device_failure_reopens_streams() {
        let backend = MockAudioBackend::new()
            .with_block_period(Duration::from_millis(1))
            .with_read_failure_after(3, 1);
        let stats = backend.stats();
        let state = state();
        let (running, handle, _) = spawn(&backend, &config(4, 3), &state);

        assert!(wait_for(|| stats.opens.load(Ordering::SeqCst) == 2));
        assert!(wait_for(|| state.status() == EngineStatus::Running));
        assert_eq!(stats.closes.load(Ordering::SeqCst), 1);

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        let audio = state.diagnostics().entries(Category::Audio);
        assert!(audio.iter().any(|e| e.message.contains("reinitializing (1/3)")));
        assert!(audio.iter().any(|e| e.message.starts_with("Audio devices reopened")));
    }

    #[test]
    fn test_exhausted_reinit_marks_failed() {
        let backend = MockAudioBackend::new()
            .with_block_period(Duration::from_millis(1))
            .with_read_failure_after(1, 10);
        let state = state();
        let (running, handle, result) = spawn(&backend, &config(4, 2), &state);
        assert!(result.is_ok());

        handle.join().unwrap();
        assert!(!running.load(Ordering::SeqCst));
        assert!(matches!(state.status(), EngineStatus::Failed { .. }));
        assert!(!state.is_running());
        assert!(!backend.stats().streams_open.load(Ordering::SeqCst));
        assert_eq!(backend.stats().opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_running_flag_follows_block_loop() {
        let backend = MockAudioBackend::new().with_block_period(Duration::from_millis(1));
        let state = state();
        let (running, handle, _) = spawn(&backend, &config(4, 3), &state);
        assert!(state.is_running());

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(!state.is_running());
    }

    #[test]
    fn test_late_open_after_abandoned_start_closes_streams() {
        let backend = MockAudioBackend::new().with_open_delay(Duration::from_millis(200));
        let stats = backend.stats();
        let state = state();
        state.set_status(EngineStatus::Starting);
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = bounded(1);
        let path = AudioPath::new(
            Arc::new(backend.clone()),
            &config(4, 3),
            Arc::clone(&state),
            Arc::clone(&running),
        );
        let handle = path.spawn(tx).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        state.abandon_start(&running, "devices did not open".to_string());
        handle.join().unwrap();

        assert!(matches!(state.status(), EngineStatus::Failed { .. }));
        assert!(!state.is_running());
        assert_eq!(stats.opens.load(Ordering::SeqCst), 1);
        assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
        assert!(!stats.streams_open.load(Ordering::SeqCst));
    }
}
