//! WebSocket voice session surface.

mod error;
mod handler;
mod messages;
mod reply;
mod session;

pub use error::{SessionError, SessionResult};
pub use handler::ws_voice_handler;
pub use messages::{IncomingMessage, OutgoingMessage};
pub use session::{Session, SessionEvent, SessionState};
