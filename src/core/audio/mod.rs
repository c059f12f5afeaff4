//! Capture-side audio plumbing: resampling, framing, and PCM buffers.
//!
//! All audio inside the server is little-endian 16-bit mono PCM at the
//! session's target rate. `CaptureFrontend` is the capture-side composition
//! (native-rate floats in, wire frames out); `RollingBuffer` is the
//! server-side store the recognizer reads decode windows from.

mod framer;
mod resampler;
mod rolling;

pub use framer::FrameAssembler;
pub use resampler::{sample_to_i16, LinearResampler};
pub use rolling::RollingBuffer;

use bytes::Bytes;

/// Composes the resampler and framer for the real-time capture path:
/// arbitrary-size float blocks at the native rate in, fixed-duration
/// target-rate frames out. Scratch buffers are reused across calls, so the
/// steady state performs no allocation.
pub struct CaptureFrontend {
    resampler: LinearResampler,
    framer: FrameAssembler,
    scratch: Vec<i16>,
    frame: Vec<i16>,
}

impl CaptureFrontend {
    pub fn new(native_rate: u32, target_rate: u32, frame_ms: u32) -> Self {
        Self {
            resampler: LinearResampler::new(native_rate, target_rate),
            framer: FrameAssembler::new(target_rate, frame_ms),
            scratch: Vec::new(),
            frame: Vec::new(),
        }
    }

    /// Feed one capture block; `on_frame` is invoked once per completed
    /// frame, in order.
    pub fn process(&mut self, input: &[f32], mut on_frame: impl FnMut(&[i16])) {
        self.scratch.clear();
        self.resampler.process(input, &mut self.scratch);
        self.framer.push(&self.scratch);
        while self.framer.pop(&mut self.frame) {
            on_frame(&self.frame);
        }
    }

    /// Drop any partial frame and carried resampler state.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.framer.clear();
    }
}

/// Decode little-endian i16 PCM bytes into samples. A trailing odd byte is
/// ignored.
pub fn pcm_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian i16 PCM bytes.
pub fn samples_to_pcm(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}
