//! Real audio devices using CPAL (Cross-Platform Audio Library).
//!
//! CPAL drives its own callbacks; lock-free rings connect them to the block
//! loop. The input callback pushes captured samples, the output callback
//! pops processed ones and pads with silence (counting an underrun) when
//! the loop falls behind.

use crate::audio::device::{AudioBackend, AudioInput, AudioOutput, AudioStreams, StreamSettings};
use crate::defaults::{self, CHANNELS};
use crate::error::{Result, SweetspotError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

type RingProducer = <HeapRb<i16> as Split>::Prod;
type RingConsumer = <HeapRb<i16> as Split>::Cons;

/// Blocks of slack in each ring.
const RING_BLOCKS: usize = 8;

/// Block periods `read_block` waits before reporting nothing.
const READ_TIMEOUT_BLOCKS: u32 = 4;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA error messages that occur during audio backend probing.
///
/// # Safety
/// This modifies environment variables which is safe when called before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// ALSA plugin aliases addressing single speaker pairs of a multichannel card.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "center:", "side:"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn matches_fragment(name: &str, fragment: &str) -> bool {
    name.to_lowercase().contains(&fragment.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn preferred(self) -> &'static str {
        match self {
            Direction::Input => defaults::PREFERRED_INPUT,
            Direction::Output => defaults::PREFERRED_OUTPUT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

fn devices(host: &cpal::Host, direction: Direction) -> Result<Vec<cpal::Device>> {
    let found = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    };
    found.map_err(|e| SweetspotError::AudioDevice {
        message: format!("Failed to enumerate {} devices: {}", direction.label(), e),
    })
}

/// Device names, with preferred devices marked "\[recommended\]".
fn list(direction: Direction) -> Result<Vec<String>> {
    let (host, found) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let found = devices(&host, direction);
        (host, found)
    });
    let _host = host; // keep host alive while iterating devices

    let mut names = Vec::new();
    for device in found? {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if matches_fragment(&name, direction.preferred()) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// The named device, else one matching the preferred fragment, else the
/// host default.
fn select_device(
    host: &cpal::Host,
    direction: Direction,
    requested: Option<&str>,
) -> Result<cpal::Device> {
    let candidates = devices(host, direction)?;

    if let Some(wanted) = requested {
        return candidates
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| SweetspotError::AudioDeviceNotFound {
                device: wanted.to_string(),
            });
    }

    if let Some(device) = candidates
        .into_iter()
        .find(|d| d.name().is_ok_and(|n| matches_fragment(&n, direction.preferred())))
    {
        return Ok(device);
    }

    let fallback = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    fallback.ok_or_else(|| SweetspotError::NoAudioDevices {
        message: format!("no {} device available", direction.label()),
    })
}

fn device_error(context: &str, e: impl std::fmt::Display) -> SweetspotError {
    SweetspotError::AudioDevice {
        message: format!("{}: {}", context, e),
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

fn error_callback(
    direction: Direction,
    failed: &Arc<AtomicBool>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    let failed = Arc::clone(failed);
    move |err| {
        tracing::error!(
            target: "sweetspot::audio",
            "{} stream error: {}",
            direction.label(),
            err
        );
        failed.store(true, Ordering::SeqCst);
    }
}

/// Build the capture stream: i16 first, f32 for devices that only expose floats.
fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    capacity: usize,
    failed: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, RingConsumer)> {
    let (mut producer, consumer) = HeapRb::<i16>::new(capacity).split();
    match device.build_input_stream(
        config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            // Overflow drops the newest samples; the loop is behind anyway.
            producer.push_slice(data);
        },
        error_callback(Direction::Input, failed),
        None,
    ) {
        Ok(stream) => return Ok((stream, consumer)),
        Err(e) => tracing::debug!(target: "sweetspot::audio", "i16 capture unavailable: {}", e),
    }

    let (mut producer, consumer) = HeapRb::<i16>::new(capacity).split();
    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    if producer.try_push(f32_to_i16(sample)).is_err() {
                        break;
                    }
                }
            },
            error_callback(Direction::Input, failed),
            None,
        )
        .map_err(|e| device_error("Failed to build input stream", e))?;
    Ok((stream, consumer))
}

/// Build the playback stream, mirroring [`build_input_stream`].
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    capacity: usize,
    failed: &Arc<AtomicBool>,
    underruns: &Arc<AtomicU64>,
) -> Result<(cpal::Stream, RingProducer)> {
    let (producer, mut consumer) = HeapRb::<i16>::new(capacity).split();
    let short = Arc::clone(underruns);
    match device.build_output_stream(
        config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            let n = consumer.pop_slice(data);
            if n < data.len() {
                data[n..].fill(0);
                short.fetch_add(1, Ordering::Relaxed);
            }
        },
        error_callback(Direction::Output, failed),
        None,
    ) {
        Ok(stream) => return Ok((stream, producer)),
        Err(e) => tracing::debug!(target: "sweetspot::audio", "i16 playback unavailable: {}", e),
    }

    let (producer, mut consumer) = HeapRb::<i16>::new(capacity).split();
    let short = Arc::clone(underruns);
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut starved = false;
                for slot in data.iter_mut() {
                    *slot = match consumer.try_pop() {
                        Some(sample) => i16_to_f32(sample),
                        None => {
                            starved = true;
                            0.0
                        }
                    };
                }
                if starved {
                    short.fetch_add(1, Ordering::Relaxed);
                }
            },
            error_callback(Direction::Output, failed),
            None,
        )
        .map_err(|e| device_error("Failed to build output stream", e))?;
    Ok((stream, producer))
}

/// Backend over the default CPAL host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&self, settings: &StreamSettings) -> Result<AudioStreams> {
        let (input_device, output_device) = with_suppressed_stderr(|| {
            let host = cpal::default_host();
            let input = select_device(&host, Direction::Input, settings.input_device.as_deref())?;
            let output =
                select_device(&host, Direction::Output, settings.output_device.as_deref())?;
            Ok::<_, SweetspotError>((input, output))
        })?;

        let input_name = input_device.name().unwrap_or_else(|_| "unknown".to_string());
        let output_name = output_device
            .name()
            .unwrap_or_else(|_| "unknown".to_string());

        let config = cpal::StreamConfig {
            channels: CHANNELS as u16,
            sample_rate: settings.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let block_samples = settings.block_samples();
        let capacity = block_samples * RING_BLOCKS;
        let failed = Arc::new(AtomicBool::new(false));
        let underruns = Arc::new(AtomicU64::new(0));

        let (input_stream, consumer) =
            build_input_stream(&input_device, &config, capacity, &failed)?;
        let (output_stream, mut producer) =
            build_output_stream(&output_device, &config, capacity, &failed, &underruns)?;

        // One block of silence absorbs scheduling jitter at startup.
        for _ in 0..block_samples {
            if producer.try_push(0).is_err() {
                break;
            }
        }

        input_stream
            .play()
            .map_err(|e| device_error("Failed to start input stream", e))?;
        output_stream
            .play()
            .map_err(|e| device_error("Failed to start output stream", e))?;

        tracing::info!(
            target: "sweetspot::audio",
            "Opened '{}' -> '{}' at {} Hz",
            input_name,
            output_name,
            settings.sample_rate
        );

        Ok(AudioStreams {
            input: Box::new(CpalInput {
                _stream: input_stream,
                consumer,
                timeout: settings.block_period() * READ_TIMEOUT_BLOCKS,
                failed: Arc::clone(&failed),
            }),
            output: Box::new(CpalOutput {
                _stream: output_stream,
                producer,
                failed,
                underruns,
                reported: 0,
            }),
            description: format!("{} -> {}", input_name, output_name),
        })
    }

    fn input_devices(&self) -> Result<Vec<String>> {
        list(Direction::Input)
    }

    fn output_devices(&self) -> Result<Vec<String>> {
        list(Direction::Output)
    }
}

struct CpalInput {
    _stream: cpal::Stream,
    consumer: RingConsumer,
    timeout: Duration,
    failed: Arc<AtomicBool>,
}

impl AudioInput for CpalInput {
    fn read_block(&mut self, block: &mut [i16]) -> Result<bool> {
        let deadline = Instant::now() + self.timeout;
        while self.consumer.occupied_len() < block.len() {
            if self.failed.load(Ordering::SeqCst) {
                return Err(device_error("Input device failed", "stream error"));
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.consumer.pop_slice(block);
        Ok(true)
    }
}

struct CpalOutput {
    _stream: cpal::Stream,
    producer: RingProducer,
    failed: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    reported: u64,
}

impl AudioOutput for CpalOutput {
    fn write_block(&mut self, block: &[i16]) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(device_error("Output device failed", "stream error"));
        }
        // A full ring means the device is behind; dropping the tail keeps latency bounded.
        self.producer.push_slice(block);
        Ok(())
    }

    fn take_underruns(&mut self) -> u64 {
        let total = self.underruns.load(Ordering::Relaxed);
        let fresh = total - self.reported;
        self.reported = total;
        fresh
    }
}
