//! Geometry-to-delay conversion.
//!
//! The speaker pair sits at the reference position, its two emitters half a
//! span either side along x. The channel whose emitter is nearer the
//! listener is delayed by the path difference so both wavefronts arrive
//! together. Everything downstream of this module works in samples.

use crate::config::{AlignmentConfig, Config};
use crate::geometry::Point;
use serde::Serialize;

/// Per-channel delay in samples.
///
/// Always within `[min_delay, max_delay]` of the controller that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DelayParameters {
    pub left: u32,
    pub right: u32,
}

impl DelayParameters {
    pub const fn new(left: u32, right: u32) -> Self {
        Self { left, right }
    }

    /// Both channels packed into one word, left in the high half.
    pub const fn pack(self) -> u64 {
        ((self.left as u64) << 32) | self.right as u64
    }

    pub const fn unpack(word: u64) -> Self {
        Self {
            left: (word >> 32) as u32,
            right: word as u32,
        }
    }

    /// Delays converted to milliseconds, for display.
    pub fn as_millis(&self, sample_rate: u32) -> (f64, f64) {
        let per_ms = f64::from(sample_rate.max(1)) / 1000.0;
        (f64::from(self.left) / per_ms, f64::from(self.right) / per_ms)
    }
}

#[derive(Debug, Clone)]
pub struct AlignmentController {
    speed_of_sound_cm_per_ms: f64,
    sample_rate: u32,
    min_delay: u32,
    max_delay: u32,
    speaker_span: f64,
}

impl AlignmentController {
    pub fn new(config: &AlignmentConfig, speaker_span: f64, sample_rate: u32) -> Self {
        Self {
            speed_of_sound_cm_per_ms: config.speed_of_sound_cm_per_ms,
            sample_rate,
            min_delay: config.min_delay_samples,
            max_delay: config.max_delay_samples.max(config.min_delay_samples),
            speaker_span,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.alignment,
            config.room.speaker_span,
            config.audio.sample_rate,
        )
    }

    /// Parameters applied while nobody is detected.
    pub fn idle(&self) -> DelayParameters {
        DelayParameters::new(self.min_delay, self.min_delay)
    }

    /// Left and right emitter positions for a speaker at `reference`.
    pub fn emitters(&self, reference: Point) -> (Point, Point) {
        let half = self.speaker_span / 2.0;
        (
            Point::new(reference.x - half, reference.y),
            Point::new(reference.x + half, reference.y),
        )
    }

    /// Delay, in samples, that compensates a path difference in centimetres.
    pub fn samples_for_path(&self, delta_cm: f64) -> u32 {
        let millis = delta_cm.abs() / self.speed_of_sound_cm_per_ms;
        let samples = (millis * f64::from(self.sample_rate) / 1000.0).round();
        // `as` saturates, so a huge path difference lands on max_delay below.
        (samples as u32).max(self.min_delay).min(self.max_delay)
    }

    /// Delay parameters steering towards the person nearest `reference`.
    pub fn compute(&self, people: &[Point], reference: Point) -> DelayParameters {
        let Some(person) = nearest(people, reference) else {
            return self.idle();
        };

        let (left, right) = self.emitters(reference);
        let delta = person.distance_to(right) - person.distance_to(left);
        let magnitude = self.samples_for_path(delta);

        if delta > 0.0 {
            // Left emitter is nearer: hold it back.
            DelayParameters::new(magnitude, self.min_delay)
        } else {
            DelayParameters::new(self.min_delay, magnitude)
        }
    }
}

/// The person closest to the reference position.
pub fn nearest(people: &[Point], reference: Point) -> Option<Point> {
    people
        .iter()
        .copied()
        .min_by(|a, b| reference.distance_to(*a).total_cmp(&reference.distance_to(*b)))
}
