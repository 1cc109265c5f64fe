//! Default configuration constants for sweetspot.
//!
//! Values match the reference installation: a 400 × 400 cm room watched by
//! four ultrasonic range sensors, feeding a stereo pair 50 cm wide.

/// Room width along the x axis, in centimetres.
pub const ROOM_WIDTH_CM: f64 = 400.0;

/// Room depth along the y axis, in centimetres.
pub const ROOM_HEIGHT_CM: f64 = 400.0;

/// Largest distance a range sensor can report, in centimetres.
pub const MAX_DISTANCE_CM: f64 = 400.0;

/// Distance between the two channel emitters of the speaker pair, in centimetres.
pub const SPEAKER_SPAN_CM: f64 = 50.0;

/// Serial line rate of the sensor controller.
pub const BAUD_RATE: u32 = 115_200;

/// Fallback serial device when discovery finds nothing.
pub const FALLBACK_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Serial read timeout in milliseconds.
///
/// Short enough that a stop request is noticed promptly.
pub const SERIAL_READ_TIMEOUT_MS: u64 = 100;

/// Delay between reconnect attempts after a transport failure.
pub const RECONNECT_BACKOFF_MS: u64 = 5_000;

/// Largest span a single frame may occupy before the decoder gives up on it.
pub const MAX_FRAME_BYTES: usize = 1024;

/// Readings kept per sensor for stability checks.
pub const HISTORY_LENGTH: usize = 5;

/// Readings within this many centimetres of each other count as stable.
pub const TOLERANCE_CM: f64 = 5.0;

/// Minimum drop below baseline that counts as a person, in centimetres.
pub const MIN_CHANGE_CM: f64 = 20.0;

/// Calibration gives up on unstable sensors after this long.
pub const CALIBRATION_TIMEOUT_MS: u64 = 10_000;

/// Frame period assumed when replaying a capture whose frames carry no
/// controller clock, in milliseconds.
pub const CAPTURE_FRAME_PERIOD_MS: u64 = 50;

/// Speed of sound at room temperature, in centimetres per millisecond.
pub const SPEED_OF_SOUND_CM_PER_MS: f64 = 34.3;

/// Smallest per-channel delay, in samples. Also the idle value.
pub const MIN_DELAY_SAMPLES: u32 = 0;

/// Largest per-channel delay, in samples (50 ms at 44.1 kHz).
pub const MAX_DELAY_SAMPLES: u32 = 2205;

/// Audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;

/// Frames per audio block.
///
/// 512 frames at 44.1 kHz gives an ≈11.6 ms deadline per block.
pub const BLOCK_SIZE: usize = 512;

/// Interleaved channels on the audio path.
pub const CHANNELS: usize = 2;

/// In-place device reinitialisations attempted before the audio path gives up.
pub const MAX_REINIT_ATTEMPTS: u32 = 3;

/// How long `start()` waits for the audio devices to open.
pub const START_TIMEOUT_MS: u64 = 10_000;

/// Period of position/parameter telemetry.
pub const TRACKING_INTERVAL_MS: u64 = 100;

/// Period of level/health telemetry.
pub const HEALTH_INTERVAL_MS: u64 = 1_000;

/// Entries kept per diagnostic category.
pub const DIAGNOSTIC_CAPACITY: usize = 100;

/// Preferred input device name fragment (the loopback capture of the player).
pub const PREFERRED_INPUT: &str = "Loopback";

/// Preferred output device name fragment (the amplifier HAT).
pub const PREFERRED_OUTPUT: &str = "IQAUDIO";
