//! Rolling capture buffer for decode windows.
//!
//! The session appends every accepted frame here and the recognizer reads
//! trailing windows out of it (a few seconds for partials, the whole
//! utterance for finals). The buffer never drops samples on its own: when
//! the ceiling is exceeded, `append` reports it and the session reacts by
//! forcing finalization.

use std::collections::VecDeque;
use std::time::Duration;

/// Bounded rolling mono PCM buffer with windowed reads.
pub struct RollingBuffer {
    sample_rate: u32,
    max_samples: usize,
    chunks: VecDeque<Vec<i16>>,
    total: usize,
}

impl RollingBuffer {
    pub fn new(sample_rate: u32, max_duration: Duration) -> Self {
        let max_samples = (sample_rate as f64 * max_duration.as_secs_f64()) as usize;
        Self {
            sample_rate,
            max_samples: max_samples.max(1),
            chunks: VecDeque::new(),
            total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Buffered audio duration at the configured sample rate.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total as f64 / f64::from(self.sample_rate))
    }

    /// Append samples. Returns true when the buffer now exceeds its ceiling;
    /// the caller is expected to finalize (and clear) promptly.
    #[must_use]
    pub fn append(&mut self, samples: &[i16]) -> bool {
        if !samples.is_empty() {
            self.chunks.push_back(samples.to_vec());
            self.total += samples.len();
        }
        self.total > self.max_samples
    }

    /// Copy out the trailing `duration` of audio (less if the buffer holds
    /// less). Returns an empty vector when nothing is buffered.
    pub fn window(&self, duration: Duration) -> Vec<i16> {
        let wanted =
            ((duration.as_secs_f64() * f64::from(self.sample_rate)) as usize).min(self.total);
        if wanted == 0 {
            return Vec::new();
        }

        let mut out = vec![0i16; wanted];
        let mut filled = 0usize;
        for chunk in self.chunks.iter().rev() {
            if filled >= wanted {
                break;
            }
            let take = chunk.len().min(wanted - filled);
            let dst_end = wanted - filled;
            out[dst_end - take..dst_end].copy_from_slice(&chunk[chunk.len() - take..]);
            filled += take;
        }
        out
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total = 0;
    }
}
