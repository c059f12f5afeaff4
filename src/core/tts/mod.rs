//! Speech synthesis seam and phrase pipeline.
//!
//! `SpeechSynthesizer` is the collaborator interface: one phrase of text in,
//! one complete audio payload out. The pipeline (see `pipeline`) splits the
//! payload into bounded chunks, tags them with the phrase sequence, and
//! replays phrases in strict order regardless of synthesis completion order.

mod aggregator;
mod pipeline;

pub use aggregator::{Phrase, PhraseAggregator, PhraseOptions};
pub use pipeline::{
    PipelineOptions, PipelineSummary, PlaybackEvent, PlaybackReassembler, SynthesisPipeline,
};

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// Outbound audio chunk ceiling, matching the wire protocol's appetite.
pub const AUDIO_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Error)]
pub enum TtsError {
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("synthesizer unavailable: {0}")]
    Unavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type TtsResult<T> = Result<T, TtsError>;

/// Renders one phrase of text to audio. Jobs for different phrases run
/// concurrently and may complete in any order; ordering is restored
/// downstream by the reassembler.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> TtsResult<Vec<u8>>;

    /// MIME type of the produced payloads.
    fn mime(&self) -> &'static str {
        "audio/wav"
    }
}

/// Split a synthesis payload into wire-sized chunks.
pub fn chunk_audio(audio: Vec<u8>) -> Vec<Bytes> {
    if audio.is_empty() {
        return Vec::new();
    }
    let audio = Bytes::from(audio);
    let mut chunks = Vec::with_capacity(audio.len().div_ceil(AUDIO_CHUNK_SIZE));
    let mut offset = 0;
    while offset < audio.len() {
        let end = (offset + AUDIO_CHUNK_SIZE).min(audio.len());
        chunks.push(audio.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Synthesizer that produces no audio. Keeps the pipeline flowing when no
/// engine is configured (the original deployment's behavior without a
/// speech backend).
pub struct SilenceSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilenceSynthesizer {
    async fn synthesize(&self, _text: &str) -> TtsResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Diagnostic synthesizer: renders each phrase as a fixed-frequency tone in
/// a WAV container, with duration proportional to the text length. Useful
/// for hearing phrase boundaries and ordering without a speech engine.
pub struct ToneSynthesizer {
    sample_rate: u32,
    frequency: f32,
    ms_per_char: u32,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frequency: 440.0,
            ms_per_char: 40,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    async fn synthesize(&self, text: &str) -> TtsResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let duration_ms = self.ms_per_char * text.chars().count() as u32;
        let total = self.sample_rate as usize * duration_ms as usize / 1000;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| TtsError::Synthesis(e.to_string()))?;
        let step = 2.0 * std::f32::consts::PI * self.frequency / self.sample_rate as f32;
        for n in 0..total {
            let sample = ((n as f32 * step).sin() * 0.2 * 32767.0) as i16;
            writer
                .write_sample(sample)
                .map_err(|e| TtsError::Synthesis(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| TtsError::Synthesis(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

/// Create a speech synthesizer by name.
///
/// Supported: `"silence"` (no audio), `"tone"` (diagnostic WAV tones).
pub fn create_synthesizer(name: &str, sample_rate: u32) -> TtsResult<Arc<dyn SpeechSynthesizer>> {
    match name.to_lowercase().as_str() {
        "silence" => Ok(Arc::new(SilenceSynthesizer)),
        "tone" => Ok(Arc::new(ToneSynthesizer::new(sample_rate))),
        other => Err(TtsError::InvalidConfiguration(format!(
            "unsupported synthesizer: {other}. Supported synthesizers: silence, tone"
        ))),
    }
}
