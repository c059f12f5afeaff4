//! Axum WebSocket handler.
//!
//! Upgrades the connection and runs one dispatch loop per session. The loop
//! is the session's single writer: it interleaves client messages with
//! internal events reported by decode and reply-cycle tasks. Outbound
//! messages flow through an mpsc channel to a dedicated sender task, so no
//! stage of the pipeline ever waits on socket backpressure while holding
//! session state.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

use super::messages::OutgoingMessage;
use super::session::{Session, SessionEvent};

/// Outbound channel depth. Audio chunks dominate; a deep buffer keeps the
/// synthesis pipeline from stalling on a slow client.
const OUTBOUND_BUFFER: usize = 1024;

/// Internal event channel depth (decode results, cycle completions).
const EVENT_BUFFER: usize = 64;

/// WebSocket voice endpoint: upgrades and hands off to the session loop.
pub async fn ws_voice_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("WebSocket voice connection upgrade requested");
    ws.on_upgrade(move |socket| handle_voice_socket(socket, state))
}

async fn handle_voice_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("WebSocket voice connection established");
    let (mut sender, mut receiver) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutgoingMessage>(OUTBOUND_BUFFER);
    let sender_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize outgoing message: {e}");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(json.into())).await {
                debug!("outbound send failed, client likely gone: {e}");
                break;
            }
        }
    });

    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(EVENT_BUFFER);
    let mut session = Session::new(&app_state, outbound_tx, events_tx);

    loop {
        select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Binary(frame))) => session.handle_binary(frame).await,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {e}");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        break;
                    }
                }
            }
            Some(event) = events_rx.recv() => {
                session.handle_event(event).await;
            }
        }
    }

    // Channel failure or close is fatal to this session only: release
    // everything it owns and stop pumping.
    session.close();
    sender_task.abort();
    info!("WebSocket voice connection terminated");
}
