//! Error types for sweetspot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweetspotError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Sensor transport errors
    #[error("Sensor transport error: {message}")]
    Transport { message: String },

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("No suitable audio devices found: {message}")]
    NoAudioDevices { message: String },

    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    // Telemetry
    #[error("Telemetry serialization failed: {0}")]
    Telemetry(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SweetspotError {
    /// True for errors raised while opening devices at `start()`.
    ///
    /// These are reported to the caller; everything else is handled
    /// inside the context that produced it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SweetspotError::NoAudioDevices { .. }
                | SweetspotError::AudioDeviceNotFound { .. }
                | SweetspotError::ConfigInvalidValue { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SweetspotError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = SweetspotError::ConfigFileNotFound {
            path: "/etc/sweetspot/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /etc/sweetspot/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = SweetspotError::ConfigInvalidValue {
            key: "audio.block_size".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.block_size: must be positive"
        );
    }

    #[test]
    fn test_transport_display() {
        let error = SweetspotError::Transport {
            message: "/dev/ttyUSB0 vanished".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Sensor transport error: /dev/ttyUSB0 vanished"
        );
    }

    #[test]
    fn test_audio_device_display() {
        let error = SweetspotError::AudioDeviceNotFound {
            device: "Loopback".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: Loopback");

        let error = SweetspotError::AudioDevice {
            message: "input stream stalled".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device error: input stream stalled");
    }

    #[test]
    fn test_configuration_classification() {
        assert!(
            SweetspotError::NoAudioDevices {
                message: "no output".to_string()
            }
            .is_configuration()
        );
        assert!(
            SweetspotError::AudioDeviceNotFound {
                device: "hw:3,0".to_string()
            }
            .is_configuration()
        );
        assert!(
            !SweetspotError::AudioDevice {
                message: "xrun".to_string()
            }
            .is_configuration()
        );
        assert!(
            !SweetspotError::Transport {
                message: "closed".to_string()
            }
            .is_configuration()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "no such device");
        let error: SweetspotError = io_error.into();
        assert!(error.to_string().contains("no such device"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: SweetspotError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SweetspotError>();
        assert_sync::<SweetspotError>();
    }
}
