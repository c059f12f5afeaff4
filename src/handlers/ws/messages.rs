//! WebSocket wire messages.
//!
//! Control messages travel as JSON discriminated by `type`; audio frames
//! travel as binary little-endian i16 mono PCM at the negotiated rate.
//! Partial transcripts are full replacements of the previous partial, and
//! `final_transcript` is emitted exactly once per utterance.

use serde::{Deserialize, Serialize};

/// Client-to-server control messages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    /// Begin an utterance. `sample_rate` is the client's capture target;
    /// `cadence` is the frame duration it intends to send, in ms.
    #[serde(rename = "start")]
    Start {
        #[serde(skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cadence: Option<u32>,
    },
    /// Force utterance finalization regardless of detector state.
    #[serde(rename = "stop")]
    Stop,
    /// Abort the active utterance/reply cycle.
    #[serde(rename = "cancel")]
    Cancel,
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "partial_transcript")]
    PartialTranscript { text: String },

    #[serde(rename = "final_transcript")]
    FinalTranscript { text: String, id: String },

    #[serde(rename = "llm_token")]
    LlmToken {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        done: bool,
    },

    #[serde(rename = "tts_chunk")]
    TtsChunk {
        seq: u64,
        index: usize,
        audio_b64: String,
        mime: String,
    },

    #[serde(rename = "tts_phrase_done")]
    TtsPhraseDone { seq: u64 },

    /// Every dispatched phrase of the cycle has been played.
    #[serde(rename = "tts_complete")]
    TtsComplete,

    /// The reply cycle is fully delivered: token stream ended and all
    /// phrases played.
    #[serde(rename = "reply_complete")]
    ReplyComplete,

    #[serde(rename = "info")]
    Info { message: String },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "log")]
    Log { message: String },
}

impl OutgoingMessage {
    pub fn token(text: impl Into<String>) -> Self {
        Self::LlmToken {
            text: Some(text.into()),
            done: false,
        }
    }

    pub fn token_done() -> Self {
        Self::LlmToken {
            text: None,
            done: true,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }
}
