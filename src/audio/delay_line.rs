//! Per-channel circular delay line.
//!
//! Each stereo block is written into two circular buffers at a shared write
//! cursor and read back `delay` samples behind it. The buffers hold
//! `max_delay + block_size` samples, so the oldest tap a block can ask for
//! is never overwritten by the block itself. Processing a block touches
//! each sample a constant number of times and never allocates.

use crate::alignment::DelayParameters;
use crate::config::Config;
use crate::defaults::CHANNELS;
use serde::{Deserialize, Serialize};

/// How the delayed tap is combined with the dry input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MixPolicy {
    /// Output is the delayed tap alone.
    #[default]
    Replace,
    /// `dry · input + wet · delayed`.
    Blend { dry: f32, wet: f32 },
}

impl MixPolicy {
    #[inline]
    fn apply(self, dry: f32, delayed: f32) -> f32 {
        match self {
            MixPolicy::Replace => delayed,
            MixPolicy::Blend { dry: d, wet: w } => d * dry + w * delayed,
        }
    }
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub struct DelayLine {
    buffers: [Vec<f32>; CHANNELS],
    cursor: usize,
    block_size: usize,
    max_delay: usize,
    mix: MixPolicy,
}

impl DelayLine {
    pub fn new(max_delay: usize, block_size: usize, mix: MixPolicy) -> Self {
        let block_size = block_size.max(1);
        let len = max_delay + block_size;
        Self {
            buffers: [vec![0.0; len], vec![0.0; len]],
            cursor: 0,
            block_size,
            max_delay,
            mix,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.alignment.max_delay_samples as usize,
            config.audio.block_size,
            config.audio.mix,
        )
    }

    /// Samples per channel buffer.
    pub fn capacity(&self) -> usize {
        self.buffers[0].len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn mix(&self) -> MixPolicy {
        self.mix
    }

    /// Zero the history, e.g. after the audio path restarts.
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }
        self.cursor = 0;
    }

    /// Delay an interleaved stereo buffer into `output`.
    ///
    /// `params` is taken once for the whole call. Inputs longer than one
    /// block are handled block by block; `output` must be at least as long
    /// as `input`, extra output samples are left untouched.
    pub fn process(&mut self, input: &[i16], output: &mut [i16], params: DelayParameters) {
        let delays = [
            (params.left as usize).min(self.max_delay),
            (params.right as usize).min(self.max_delay),
        ];
        let frames = input.len().min(output.len()) / CHANNELS;

        let mut frame = 0;
        while frame < frames {
            let n = (frames - frame).min(self.block_size);
            let span = frame * CHANNELS..(frame + n) * CHANNELS;
            self.process_block(&input[span.clone()], &mut output[span], delays);
            frame += n;
        }
    }

    fn process_block(&mut self, input: &[i16], output: &mut [i16], delays: [usize; CHANNELS]) {
        let len = self.capacity();
        let n = input.len() / CHANNELS;
        let cursor = self.cursor;
        let mix = self.mix;

        for (ch, buffer) in self.buffers.iter_mut().enumerate() {
            // Write, as two runs when the block crosses the buffer end.
            let head = (len - cursor).min(n);
            for (i, slot) in buffer[cursor..cursor + head].iter_mut().enumerate() {
                *slot = f32::from(input[i * CHANNELS + ch]);
            }
            for (i, slot) in buffer[..n - head].iter_mut().enumerate() {
                *slot = f32::from(input[(head + i) * CHANNELS + ch]);
            }

            // Read `delay` behind the cursor, again in at most two runs.
            let start = (cursor + len - delays[ch]) % len;
            let head = (len - start).min(n);
            let runs = buffer[start..start + head]
                .iter()
                .chain(buffer[..n - head].iter());
            for (i, &delayed) in runs.enumerate() {
                let at = i * CHANNELS + ch;
                output[at] = to_i16(mix.apply(f32::from(input[at]), delayed));
            }
        }

        self.cursor = (cursor + n) % len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleave(left: &[i16], right: &[i16]) -> Vec<i16> {
        left.iter()
            .zip(right)
            .flat_map(|(&l, &r)| [l, r])
            .collect()
    }

    fn channel(buf: &[i16], ch: usize) -> Vec<i16> {
        buf.iter().skip(ch).step_by(CHANNELS).copied().collect()
    }

    #[test]
    fn test_capacity_covers_max_delay_plus_block() {
        let line = DelayLine::new(2205, 512, MixPolicy::Replace);
        assert_eq!(line.capacity(), 2205 + 512);
        assert_eq!(line.cursor(), 0);
    }

    #[test]
    fn test_zero_delay_is_identity() {
        let mut line = DelayLine::new(64, 16, MixPolicy::Replace);
        let left: Vec<i16> = (0..16).map(|i| i * 100 - 700).collect();
        let right: Vec<i16> = (0..16).map(|i| i16::MAX - i).collect();
        let input = interleave(&left, &right);
        let mut output = vec![0i16; input.len()];

        for _ in 0..10 {
            line.process(&input, &mut output, DelayParameters::new(0, 0));
            assert_eq!(output, input);
        }
    }

    #[test]
    fn test_zero_delay_blend_is_identity() {
        let mut line = DelayLine::new(64, 16, MixPolicy::Blend { dry: 0.8, wet: 0.2 });
        let input: Vec<i16> = (0..32).map(|i| (i * 1013 % 30000) as i16 - 15000).collect();
        let mut output = vec![0i16; input.len()];
        line.process(&input, &mut output, DelayParameters::new(0, 0));
        assert_eq!(output, input);
    }

    #[test]
    fn test_delay_across_wraparound() {
        // Capacity 7: every few blocks the cursor wraps.
        let block = 4;
        let mut line = DelayLine::new(3, block, MixPolicy::Replace);
        let params = DelayParameters::new(3, 1);

        let total = 40;
        let left: Vec<i16> = (1..=total).collect();
        let right: Vec<i16> = (1..=total).map(|v| -v).collect();
        let input = interleave(&left, &right);
        let mut output = vec![0i16; input.len()];

        for (inp, out) in input
            .chunks(block * CHANNELS)
            .zip(output.chunks_mut(block * CHANNELS))
        {
            line.process(inp, out, params);
        }

        let out_left = channel(&output, 0);
        let out_right = channel(&output, 1);
        for i in 0..total as usize {
            let expect_left = if i >= 3 { left[i - 3] } else { 0 };
            let expect_right = if i >= 1 { right[i - 1] } else { 0 };
            assert_eq!(out_left[i], expect_left, "left sample {}", i);
            assert_eq!(out_right[i], expect_right, "right sample {}", i);
        }
    }

    #[test]
    fn test_blend_mixes_dry_and_delayed() {
        let mut line = DelayLine::new(8, 4, MixPolicy::Blend { dry: 0.8, wet: 0.2 });
        let params = DelayParameters::new(2, 0);

        let left = [1000i16, 2000, 3000, 4000];
        let right = [500i16; 4];
        let input = interleave(&left, &right);
        let mut output = vec![0i16; 8];
        line.process(&input, &mut output, params);

        // First two left samples have silence as their delayed tap.
        assert_eq!(channel(&output, 0), vec![800, 1600, 2600, 3600]);
        assert_eq!(channel(&output, 1), vec![500; 4]);
    }

    #[test]
    fn test_output_is_clipped() {
        let mut line = DelayLine::new(4, 2, MixPolicy::Blend { dry: 1.0, wet: 1.0 });
        let input = [i16::MAX, i16::MIN, i16::MAX, i16::MIN];
        let mut output = [0i16; 4];
        line.process(&input, &mut output, DelayParameters::new(0, 0));
        assert_eq!(output, [i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_long_input_is_processed_in_blocks() {
        let mut chunked = DelayLine::new(16, 4, MixPolicy::Replace);
        let mut whole = DelayLine::new(16, 4, MixPolicy::Replace);
        let params = DelayParameters::new(5, 9);

        let input: Vec<i16> = (0..64).collect();
        let mut expected = vec![0i16; 64];
        for (inp, out) in input.chunks(8).zip(expected.chunks_mut(8)) {
            chunked.process(inp, out, params);
        }

        let mut output = vec![0i16; 64];
        whole.process(&input, &mut output, params);
        assert_eq!(output, expected);
        assert_eq!(whole.cursor(), chunked.cursor());
    }

    #[test]
    fn test_delay_beyond_max_is_capped() {
        let mut line = DelayLine::new(2, 2, MixPolicy::Replace);
        let input: Vec<i16> = interleave(&[1, 2, 3, 4, 5, 6], &[1, 2, 3, 4, 5, 6]);
        let mut output = vec![0i16; input.len()];
        line.process(&input, &mut output, DelayParameters::new(100, 2));
        assert_eq!(channel(&output, 0), channel(&output, 1));
        assert_eq!(channel(&output, 0), vec![0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_clear_resets_history() {
        let mut line = DelayLine::new(4, 2, MixPolicy::Replace);
        let mut output = [0i16; 4];
        line.process(&[7, 7, 7, 7], &mut output, DelayParameters::new(1, 1));
        line.clear();
        assert_eq!(line.cursor(), 0);
        line.process(&[0, 0, 0, 0], &mut output, DelayParameters::new(2, 2));
        assert_eq!(output, [0; 4]);
    }

    #[test]
    fn test_mix_policy_toml_forms() {
        #[derive(Deserialize)]
        struct Wrapper {
            mix: MixPolicy,
        }
        let replace: Wrapper = toml::from_str(r#"mix = "replace""#).unwrap();
        assert_eq!(replace.mix, MixPolicy::Replace);

        let blend: Wrapper = toml::from_str("mix = { blend = { dry = 0.5, wet = 0.5 } }").unwrap();
        assert_eq!(blend.mix, MixPolicy::Blend { dry: 0.5, wet: 0.5 });
    }
}
