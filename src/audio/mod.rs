pub mod delay_line;
pub mod device;
pub mod levels;

#[cfg(feature = "cpal-audio")]
pub mod capture;

pub use delay_line::{DelayLine, MixPolicy};
pub use device::{
    AudioBackend, AudioInput, AudioOutput, AudioStreams, MockAudioBackend, StreamSettings,
};
pub use levels::{LevelMeters, LevelSummary};

#[cfg(feature = "cpal-audio")]
pub use capture::CpalBackend;
