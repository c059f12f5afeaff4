//! Core voice-processing components.
//!
//! Everything here is transport-agnostic: audio plumbing, endpointing,
//! collaborator seams, phrase aggregation, the ordered synthesis pipeline,
//! and latency metrics. The WebSocket session in `handlers::ws` wires these
//! together per connection.

pub mod audio;
pub mod llm;
pub mod metrics;
pub mod stt;
pub mod tts;
pub mod vad;
