//! Speech recognition seam.
//!
//! The session requests incremental (partial) and whole-utterance (final)
//! decodes through `SpeechRecognizer`. The engine behind the trait is a
//! collaborator, not part of the core: decodes run off the real-time path
//! and may block; a failed decode is surfaced and discarded without harming
//! the session.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SttError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type SttResult<T> = Result<T, SttError>;

/// Decodes a PCM span into text.
///
/// Implementations receive the full span for every request; partial results
/// are full replacements, so no incremental state is carried between calls.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> SttResult<String>;
}

/// Recognizer that hears nothing. Stands in when no engine is configured so
/// the rest of the pipeline still exercises end to end.
pub struct NullRecognizer;

#[async_trait]
impl SpeechRecognizer for NullRecognizer {
    async fn transcribe(&self, _pcm: &[i16], _sample_rate: u32) -> SttResult<String> {
        Ok(String::new())
    }
}

/// Create a speech recognizer by name.
///
/// Supported: `"null"` (built-in no-op). Real engines implement
/// `SpeechRecognizer` and are registered by the embedding application.
pub fn create_recognizer(name: &str) -> SttResult<Arc<dyn SpeechRecognizer>> {
    match name.to_lowercase().as_str() {
        "null" => Ok(Arc::new(NullRecognizer)),
        other => Err(SttError::InvalidConfiguration(format!(
            "unsupported recognizer: {other}. Supported recognizers: null"
        ))),
    }
}
