//! Linear-interpolation resampling for the capture path.
//!
//! Converts float capture blocks at an arbitrary native rate into 16-bit
//! samples at the session's target rate. The resampler is streaming: the
//! trailing source samples of each block are retained so interpolation is
//! continuous across block boundaries, and the output position is a single
//! running accumulator, so the total emitted count is exactly
//! `floor(consumed * target / native)` over any sequence of block sizes.

/// Streaming linear resampler, f32 native-rate in, i16 target-rate out.
///
/// Runs synchronously on the capture path: no I/O, and no allocation in the
/// steady state beyond the caller-provided output vector.
pub struct LinearResampler {
    /// Source samples consumed per output sample (`native / target`).
    step: f64,
    /// Source position of the next output sample, relative to `tail[0]`.
    pos: f64,
    /// Trailing source samples retained for cross-block interpolation.
    tail: Vec<f32>,
    /// How many trailing samples to retain (`max(1, ceil(step))`).
    tail_len: usize,
}

impl LinearResampler {
    pub fn new(native_rate: u32, target_rate: u32) -> Self {
        debug_assert!(native_rate > 0 && target_rate > 0);
        let step = f64::from(native_rate) / f64::from(target_rate);
        let tail_len = (step.ceil() as usize).max(1);
        Self {
            step,
            pos: 0.0,
            tail: Vec::with_capacity(tail_len),
            tail_len,
        }
    }

    /// Resample one capture block, appending converted samples to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<i16>) {
        if input.is_empty() {
            return;
        }

        let held = self.tail.len();
        let len = held + input.len();
        let last = len - 1;
        let tail = &self.tail[..];
        let src =
            |i: usize| -> f32 { if i < held { tail[i] } else { input[i - held] } };

        // An output at source position p needs sources up to p + step fully
        // consumed; this gate makes the cumulative count floor(consumed / step).
        let mut pos = self.pos;
        let limit = len as f64;
        while pos + self.step <= limit {
            let base = (pos.floor() as usize).min(last);
            let next = (base + 1).min(last);
            let frac = (pos - base as f64) as f32;
            let value = src(base) + (src(next) - src(base)) * frac;
            out.push(sample_to_i16(value));
            pos += self.step;
        }
        self.pos = pos;

        // Retain the trailing window and rebase the position onto it.
        let keep = self.tail_len.min(len);
        let shift = len - keep;
        if input.len() >= keep {
            self.tail.clear();
            self.tail.extend_from_slice(&input[input.len() - keep..]);
        } else {
            self.tail.drain(..shift);
            self.tail.extend_from_slice(input);
        }
        self.pos -= shift as f64;
    }

    /// Forget carried state; the next block starts a fresh stream.
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.tail.clear();
    }
}

/// Clamp a [-1, 1] float sample and scale it to the full i16 range.
#[inline]
pub fn sample_to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0) as i16
}
