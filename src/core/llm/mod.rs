//! Reply generation seam.
//!
//! After a final transcript the session opens one reply cycle and streams
//! tokens from a `ReplyGenerator`. Fragments must be yielded in production
//! order; the stream ending is the terminal marker. The built-in
//! `EchoGenerator` replays the prompt word by word with a small delay, which
//! keeps the full pipeline exercisable without an external model.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation-memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered token fragments; the stream ending is the terminal marker.
pub type TokenStream = BoxStream<'static, LlmResult<String>>;

/// Streams a reply for the given conversation history.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn stream(&self, history: Vec<ChatMessage>) -> LlmResult<TokenStream>;
}

/// Fallback generator: replays the last user message word by word.
pub struct EchoGenerator {
    token_delay: Duration,
}

impl EchoGenerator {
    pub fn new(token_delay: Duration) -> Self {
        Self { token_delay }
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn stream(&self, history: Vec<ChatMessage>) -> LlmResult<TokenStream> {
        let prompt = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let mut tokens: Vec<String> = prompt
            .split_whitespace()
            .map(|word| format!("{word} "))
            .collect();
        if tokens.is_empty() {
            tokens = vec!["I'm ".into(), "thinking ".into(), "...".into()];
        }

        let delay = self.token_delay;
        let stream = stream::iter(tokens)
            .then(move |token| async move {
                tokio::time::sleep(delay).await;
                Ok(token)
            })
            .boxed();
        Ok(stream)
    }
}

/// Create a reply generator by name.
///
/// Supported: `"echo"` (built-in word-by-word echo).
pub fn create_generator(name: &str) -> LlmResult<Arc<dyn ReplyGenerator>> {
    match name.to_lowercase().as_str() {
        "echo" => Ok(Arc::new(EchoGenerator::default())),
        other => Err(LlmError::InvalidConfiguration(format!(
            "unsupported generator: {other}. Supported generators: echo"
        ))),
    }
}
