//! Rolling audio level summaries.
//!
//! The audio context folds each block's peak into an atomic maximum; the
//! telemetry context swaps it back to zero once per health tick. Neither
//! side ever waits for the other.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Lowest level reported, for silence.
pub const FLOOR_DBFS: f32 = -96.0;

/// Largest absolute sample seen since the last [`PeakMeter::take`].
#[derive(Debug, Default)]
pub struct PeakMeter {
    peak: AtomicU32,
}

impl PeakMeter {
    pub fn observe(&self, samples: &[i16]) {
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        self.peak.fetch_max(u32::from(peak), Ordering::Relaxed);
    }

    /// Peak as a fraction of full scale, resetting the meter.
    pub fn take(&self) -> f32 {
        self.peak.swap(0, Ordering::Relaxed) as f32 / 32768.0
    }

    pub fn peek(&self) -> f32 {
        self.peak.load(Ordering::Relaxed) as f32 / 32768.0
    }
}

/// Convert a linear peak (0.0..=1.0) to dBFS.
pub fn to_dbfs(peak: f32) -> f32 {
    if peak <= 0.0 {
        FLOOR_DBFS
    } else {
        (20.0 * peak.log10()).max(FLOOR_DBFS)
    }
}

/// Meters shared between the audio context and telemetry.
#[derive(Debug, Default)]
pub struct LevelMeters {
    pub input: PeakMeter,
    pub output: PeakMeter,
    underruns: AtomicU64,
    blocks: AtomicU64,
}

/// One health-tick worth of level data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelSummary {
    pub input_peak: f32,
    pub output_peak: f32,
    pub input_dbfs: f32,
    pub output_dbfs: f32,
    /// Cumulative since the engine was created.
    pub underruns: u64,
    pub blocks: u64,
}

impl LevelMeters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block(&self, input: &[i16], output: &[i16]) {
        self.input.observe(input);
        self.output.observe(output);
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underruns(&self, count: u64) {
        if count > 0 {
            self.underruns.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Take the peaks accumulated since the last call.
    pub fn take_summary(&self) -> LevelSummary {
        let input_peak = self.input.take();
        let output_peak = self.output.take();
        LevelSummary {
            input_peak,
            output_peak,
            input_dbfs: to_dbfs(input_peak),
            output_dbfs: to_dbfs(output_peak),
            underruns: self.underruns(),
            blocks: self.blocks.load(Ordering::Relaxed),
        }
    }
}
