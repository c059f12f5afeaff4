//! Session error types.

use thiserror::Error;

/// Errors raised while driving a WebSocket voice session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A control message arrived in a state where it is not valid.
    #[error("'{message}' is not valid while the session is {state}")]
    InvalidState {
        message: &'static str,
        state: &'static str,
    },

    /// A JSON payload did not parse as a control message.
    #[error("invalid message format: {0}")]
    InvalidMessage(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
