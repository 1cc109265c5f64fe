use crate::audio::delay_line::MixPolicy;
use crate::defaults;
use crate::error::{Result, SweetspotError};
use crate::sensor::protocol::ProtocolVariant;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub room: RoomConfig,
    pub sensor: SensorConfig,
    pub tracking: TrackingConfig,
    pub alignment: AlignmentConfig,
    pub audio: AudioConfig,
    pub telemetry: TelemetryConfig,
}

/// Room and speaker geometry, in centimetres
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoomConfig {
    pub width: f64,
    pub height: f64,
    pub max_distance: f64,
    pub speaker_span: f64,
}

/// Sensor transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial device path. `None` means discover.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub protocol: ProtocolVariant,
    pub read_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub max_frame_bytes: usize,
}

/// Calibration and occupancy detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    pub history_length: usize,
    pub tolerance: f64,
    pub min_change: f64,
    pub calibration_timeout_ms: u64,
}

/// Geometry-to-delay conversion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignmentConfig {
    pub speed_of_sound_cm_per_ms: f64,
    pub min_delay_samples: u32,
    pub max_delay_samples: u32,
}

/// Audio path configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub block_size: usize,
    pub mix: MixPolicy,
    pub max_reinit_attempts: u32,
    pub start_timeout_ms: u64,
}

/// Telemetry cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub tracking_interval_ms: u64,
    pub health_interval_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            width: defaults::ROOM_WIDTH_CM,
            height: defaults::ROOM_HEIGHT_CM,
            max_distance: defaults::MAX_DISTANCE_CM,
            speaker_span: defaults::SPEAKER_SPAN_CM,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: defaults::BAUD_RATE,
            protocol: ProtocolVariant::Array,
            read_timeout_ms: defaults::SERIAL_READ_TIMEOUT_MS,
            reconnect_backoff_ms: defaults::RECONNECT_BACKOFF_MS,
            max_frame_bytes: defaults::MAX_FRAME_BYTES,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            history_length: defaults::HISTORY_LENGTH,
            tolerance: defaults::TOLERANCE_CM,
            min_change: defaults::MIN_CHANGE_CM,
            calibration_timeout_ms: defaults::CALIBRATION_TIMEOUT_MS,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            speed_of_sound_cm_per_ms: defaults::SPEED_OF_SOUND_CM_PER_MS,
            min_delay_samples: defaults::MIN_DELAY_SAMPLES,
            max_delay_samples: defaults::MAX_DELAY_SAMPLES,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            block_size: defaults::BLOCK_SIZE,
            mix: MixPolicy::Replace,
            max_reinit_attempts: defaults::MAX_REINIT_ATTEMPTS,
            start_timeout_ms: defaults::START_TIMEOUT_MS,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tracking_interval_ms: defaults::TRACKING_INTERVAL_MS,
            health_interval_ms: defaults::HEALTH_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values. The result is validated.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SweetspotError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SweetspotError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(SweetspotError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SWEETSPOT_SERIAL_PORT → sensor.port
    /// - SWEETSPOT_PROTOCOL → sensor.protocol ("array" or "object")
    /// - SWEETSPOT_INPUT_DEVICE → audio.input_device
    /// - SWEETSPOT_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("SWEETSPOT_SERIAL_PORT")
            && !port.is_empty()
        {
            self.sensor.port = Some(port);
        }

        if let Ok(protocol) = std::env::var("SWEETSPOT_PROTOCOL")
            && let Ok(variant) = protocol.parse::<ProtocolVariant>()
        {
            self.sensor.protocol = variant;
        }

        if let Ok(device) = std::env::var("SWEETSPOT_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("SWEETSPOT_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Check cross-field invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Result<()> {
            Err(SweetspotError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        if !(self.room.width > 0.0) {
            return invalid("room.width", "must be positive");
        }
        if !(self.room.height > 0.0) {
            return invalid("room.height", "must be positive");
        }
        if !(self.room.max_distance > 0.0) {
            return invalid("room.max_distance", "must be positive");
        }
        if self.room.speaker_span < 0.0 {
            return invalid("room.speaker_span", "must not be negative");
        }
        if self.tracking.history_length < 2 {
            return invalid("tracking.history_length", "must be at least 2");
        }
        if !(self.alignment.speed_of_sound_cm_per_ms > 0.0) {
            return invalid("alignment.speed_of_sound_cm_per_ms", "must be positive");
        }
        if self.alignment.min_delay_samples > self.alignment.max_delay_samples {
            return invalid(
                "alignment.min_delay_samples",
                "must not exceed alignment.max_delay_samples",
            );
        }
        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate", "must be positive");
        }
        if self.audio.block_size == 0 {
            return invalid("audio.block_size", "must be positive");
        }
        if self.sensor.max_frame_bytes < 2 {
            return invalid("sensor.max_frame_bytes", "must hold at least two markers");
        }
        if let MixPolicy::Blend { dry, wet } = self.audio.mix
            && (dry < 0.0 || wet < 0.0)
        {
            return invalid("audio.mix", "blend weights must not be negative");
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/sweetspot/config.toml on Linux, or a relative
    /// `sweetspot/config.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sweetspot")
            .join("config.toml")
    }
}
