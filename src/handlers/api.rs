//! HTTP handlers: health check and the one-shot voice round trip.

use axum::{extract::State, http::StatusCode, response::Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::audio::pcm_to_samples;
use crate::core::llm::ChatMessage;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Health check handler
/// Returns a simple JSON response indicating the server is running
pub async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "OK"
    })))
}

#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    pub audio_b64: String,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct VoiceResponse {
    pub transcript: String,
    pub assistant: String,
}

/// Non-streaming round trip: one utterance of base64 PCM in, the transcript
/// and the fully drained reply out. The streaming WebSocket surface is the
/// primary interface; this endpoint serves batch clients and smoke tests.
pub async fn voice_round_trip(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VoiceRequest>,
) -> AppResult<Json<VoiceResponse>> {
    let expected_rate = state.config.session.sample_rate;
    if let Some(rate) = request.sample_rate {
        if rate != expected_rate {
            return Err(AppError::BadRequest(format!(
                "unsupported sample rate {rate}, server expects {expected_rate}"
            )));
        }
    }

    let pcm = BASE64
        .decode(request.audio_b64.as_bytes())
        .map_err(|e| AppError::BadRequest(format!("invalid audio encoding: {e}")))?;
    let samples = pcm_to_samples(&pcm);

    let transcript = state
        .recognizer
        .transcribe(&samples, expected_rate)
        .await
        .map_err(|e| AppError::InternalServerError(format!("transcription failed: {e}")))?;
    if transcript.trim().is_empty() {
        return Err(AppError::UnprocessableEntity(
            "unable to transcribe audio".to_string(),
        ));
    }

    let history = vec![ChatMessage::user(transcript.clone())];
    let mut stream = state
        .generator
        .stream(history)
        .await
        .map_err(|e| AppError::InternalServerError(format!("reply generation failed: {e}")))?;

    let mut assistant = String::new();
    while let Some(token) = stream.next().await {
        let token =
            token.map_err(|e| AppError::InternalServerError(format!("reply stream failed: {e}")))?;
        assistant.push_str(&token);
    }

    Ok(Json(VoiceResponse {
        transcript,
        assistant: assistant.trim().to_string(),
    }))
}
