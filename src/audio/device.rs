//! Audio device seams.
//!
//! The audio context opens an input and an output stream through an
//! [`AudioBackend`] from inside its own thread, then pulls one block from
//! the input, delays it and pushes it to the output. Streams are dropped to
//! close them; a restart always opens fresh ones.

use crate::config::AudioConfig;
use crate::defaults::CHANNELS;
use crate::error::{Result, SweetspotError};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// What the audio context asks the backend to open.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub sample_rate: u32,
    /// Frames per block.
    pub block_size: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl StreamSettings {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }

    /// Interleaved samples per block.
    pub fn block_samples(&self) -> usize {
        self.block_size * CHANNELS
    }

    /// Wall-clock duration of one block.
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / f64::from(self.sample_rate.max(1)))
    }
}

/// Source of interleaved stereo blocks.
pub trait AudioInput {
    /// Fill `block` with the next block.
    ///
    /// Waits at most a few block periods; `Ok(false)` means nothing arrived
    /// in time and `block` is unchanged.
    fn read_block(&mut self, block: &mut [i16]) -> Result<bool>;
}

/// Sink for interleaved stereo blocks.
pub trait AudioOutput {
    fn write_block(&mut self, block: &[i16]) -> Result<()>;

    /// Underruns since the last call.
    fn take_underruns(&mut self) -> u64 {
        0
    }
}

/// An opened input/output pair.
pub struct AudioStreams {
    pub input: Box<dyn AudioInput>,
    pub output: Box<dyn AudioOutput>,
    pub description: String,
}

/// Trait for audio backends.
///
/// This trait allows swapping implementations (real devices vs mock).
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open both streams.
    ///
    /// Fails with [`SweetspotError::NoAudioDevices`] or
    /// [`SweetspotError::AudioDeviceNotFound`] when the hardware isn't there,
    /// and with [`SweetspotError::AudioDevice`] for anything transient.
    fn open(&self, settings: &StreamSettings) -> Result<AudioStreams>;

    fn input_devices(&self) -> Result<Vec<String>>;

    fn output_devices(&self) -> Result<Vec<String>>;
}

/// Counters shared by a [`MockAudioBackend`] and every stream it opens.
#[derive(Debug, Default)]
pub struct MockStats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub blocks_read: AtomicUsize,
    pub blocks_written: AtomicUsize,
    pub streams_open: AtomicBool,
    written: Mutex<Vec<i16>>,
}

impl MockStats {
    /// Samples written to outputs so far (most recent 64k).
    pub fn written(&self) -> Vec<i16> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Mock audio backend for testing
#[derive(Debug, Clone)]
pub struct MockAudioBackend {
    signal: Arc<Vec<i16>>,
    period: Duration,
    no_devices: bool,
    open_failures: Arc<AtomicU32>,
    fail_after_blocks: Option<usize>,
    failing_streams: Arc<AtomicU32>,
    open_delay: Duration,
    stats: Arc<MockStats>,
}

const WRITTEN_CAP: usize = 1 << 16;

impl MockAudioBackend {
    pub fn new() -> Self {
        Self {
            signal: Arc::new(vec![1000, -1000]),
            period: Duration::from_millis(2),
            no_devices: false,
            open_failures: Arc::new(AtomicU32::new(0)),
            fail_after_blocks: None,
            failing_streams: Arc::new(AtomicU32::new(0)),
            open_delay: Duration::ZERO,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Interleaved samples the input repeats.
    pub fn with_signal(mut self, signal: Vec<i16>) -> Self {
        if !signal.is_empty() {
            self.signal = Arc::new(signal);
        }
        self
    }

    /// Time each read takes.
    pub fn with_block_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Behave like a machine with no sound card.
    pub fn with_no_devices(mut self) -> Self {
        self.no_devices = true;
        self
    }

    /// Fail the next `count` opens with a transient device error.
    pub fn with_open_failures(self, count: u32) -> Self {
        self.open_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Time every open takes, like a device that is slow to come up.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// The next `streams` opened inputs fail after `blocks` reads.
    pub fn with_read_failure_after(mut self, blocks: usize, streams: u32) -> Self {
        self.fail_after_blocks = Some(blocks);
        self.failing_streams.store(streams, Ordering::SeqCst);
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl AudioBackend for MockAudioBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&self, settings: &StreamSettings) -> Result<AudioStreams> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if self.no_devices {
            return Err(SweetspotError::NoAudioDevices {
                message: "mock backend has no devices".to_string(),
            });
        }
        if take_one(&self.open_failures) {
            return Err(SweetspotError::AudioDevice {
                message: "mock open failure".to_string(),
            });
        }

        let fail_after = if take_one(&self.failing_streams) {
            self.fail_after_blocks
        } else {
            None
        };

        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        self.stats.streams_open.store(true, Ordering::SeqCst);

        Ok(AudioStreams {
            input: Box::new(MockInput {
                signal: Arc::clone(&self.signal),
                position: 0,
                period: self.period,
                reads: 0,
                fail_after,
                stats: Arc::clone(&self.stats),
            }),
            output: Box::new(MockOutput {
                stats: Arc::clone(&self.stats),
            }),
            description: format!(
                "mock {} Hz, {} frames/block",
                settings.sample_rate, settings.block_size
            ),
        })
    }

    fn input_devices(&self) -> Result<Vec<String>> {
        Ok(if self.no_devices {
            Vec::new()
        } else {
            vec!["Mock Loopback".to_string()]
        })
    }

    fn output_devices(&self) -> Result<Vec<String>> {
        Ok(if self.no_devices {
            Vec::new()
        } else {
            vec!["Mock IQAUDIO".to_string()]
        })
    }
}

struct MockInput {
    signal: Arc<Vec<i16>>,
    position: usize,
    period: Duration,
    reads: usize,
    fail_after: Option<usize>,
    stats: Arc<MockStats>,
}

impl AudioInput for MockInput {
    fn read_block(&mut self, block: &mut [i16]) -> Result<bool> {
        if self.fail_after.is_some_and(|limit| self.reads >= limit) {
            return Err(SweetspotError::AudioDevice {
                message: "mock read failure".to_string(),
            });
        }
        if !self.period.is_zero() {
            std::thread::sleep(self.period);
        }
        for sample in block.iter_mut() {
            *sample = self.signal[self.position];
            self.position = (self.position + 1) % self.signal.len();
        }
        self.reads += 1;
        self.stats.blocks_read.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

struct MockOutput {
    stats: Arc<MockStats>,
}

impl AudioOutput for MockOutput {
    fn write_block(&mut self, block: &[i16]) -> Result<()> {
        let mut written = self
            .stats
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if written.len() + block.len() > WRITTEN_CAP {
            written.clear();
        }
        written.extend_from_slice(block);
        self.stats.blocks_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.stats.streams_open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings::from_config(&AudioConfig {
            block_size: 4,
            ..AudioConfig::default()
        })
    }

    #[test]
    fn test_stream_settings() {
        let s = settings();
        assert_eq!(s.block_samples(), 8);
        assert_eq!(s.sample_rate, 44_100);
        let period = StreamSettings::from_config(&AudioConfig::default()).block_period();
        assert!((period.as_secs_f64() - 512.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn test_mock_backend_repeats_signal() {
        let backend = MockAudioBackend::new()
            .with_signal(vec![1, 2, 3])
            .with_block_period(Duration::ZERO);
        let mut streams = backend.open(&settings()).unwrap();

        let mut block = [0i16; 8];
        assert!(streams.input.read_block(&mut block).unwrap());
        assert_eq!(block, [1, 2, 3, 1, 2, 3, 1, 2]);
        streams.output.write_block(&block).unwrap();

        let stats = backend.stats();
        assert_eq!(stats.opens.load(Ordering::SeqCst), 1);
        assert_eq!(stats.written(), block.to_vec());
        assert!(stats.streams_open.load(Ordering::SeqCst));

        drop(streams);
        assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
        assert!(!stats.streams_open.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mock_backend_without_devices() {
        let backend = MockAudioBackend::new().with_no_devices();
        match backend.open(&settings()) {
            Err(e) => assert!(e.is_configuration()),
            Ok(_) => panic!("Expected NoAudioDevices"),
        }
        assert!(backend.input_devices().unwrap().is_empty());
    }

    #[test]
    fn test_mock_backend_open_failures_are_transient() {
        let backend = MockAudioBackend::new().with_open_failures(2);
        assert!(backend.open(&settings()).is_err());
        match backend.open(&settings()) {
            Err(e) => assert!(!e.is_configuration()),
            Ok(_) => panic!("Expected AudioDevice error"),
        }
        assert!(backend.open(&settings()).is_ok());
    }

    #[test]
    fn test_mock_backend_read_failure_applies_to_first_streams() {
        let backend = MockAudioBackend::new()
            .with_block_period(Duration::ZERO)
            .with_read_failure_after(1, 1);
        let mut block = [0i16; 8];

        let mut first = backend.open(&settings()).unwrap();
        assert!(first.input.read_block(&mut block).is_ok());
        assert!(first.input.read_block(&mut block).is_err());

        let mut second = backend.open(&settings()).unwrap();
        for _ in 0..5 {
            assert!(second.input.read_block(&mut block).is_ok());
        }
    }
}
