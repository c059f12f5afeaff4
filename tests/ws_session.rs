//! End-to-end WebSocket session flows.
//!
//! Each test boots the real axum server on an ephemeral port with scripted
//! engines behind the collaborator traits, then drives it with a
//! tokio-tungstenite client exactly as a capture frontend would: a `start`
//! control message, binary PCM frames, then `stop`/`cancel`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream::{self, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use voxstream::core::llm::{ChatMessage, LlmResult, ReplyGenerator, TokenStream};
use voxstream::core::stt::{SpeechRecognizer, SttResult};
use voxstream::core::tts::{SpeechSynthesizer, TtsResult};
use voxstream::core::vad::EnergyClassifier;
use voxstream::{routes, AppState, ServerConfig, SessionConfig};

// ---------------------------------------------------------------------------
// Scripted engines
// ---------------------------------------------------------------------------

struct FixedRecognizer(&'static str);

#[async_trait]
impl SpeechRecognizer for FixedRecognizer {
    async fn transcribe(&self, pcm: &[i16], _rate: u32) -> SttResult<String> {
        // Silence decodes to nothing, speech to the scripted text.
        let speech = pcm.iter().any(|&s| s != 0);
        Ok(if speech { self.0.to_string() } else { String::new() })
    }
}

/// Yields a fixed fragment script with a small inter-fragment delay.
struct ScriptedGenerator {
    fragments: Vec<&'static str>,
    delay: Duration,
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn stream(&self, _history: Vec<ChatMessage>) -> LlmResult<TokenStream> {
        let delay = self.delay;
        let fragments: Vec<String> = self.fragments.iter().map(|s| s.to_string()).collect();
        Ok(stream::iter(fragments)
            .then(move |fragment| async move {
                tokio::time::sleep(delay).await;
                Ok(fragment)
            })
            .boxed())
    }
}

/// Completes quickly except for phrases containing "Hello", which finish
/// last; payload is the phrase text so the client can verify attribution.
struct ScrambledSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ScrambledSynthesizer {
    async fn synthesize(&self, text: &str) -> TtsResult<Vec<u8>> {
        let delay = if text.contains("Hello") { 250 } else { 10 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(text.as_bytes().to_vec())
    }
}

/// Never finishes inside a test's patience window.
struct GlacialSynthesizer;

#[async_trait]
impl SpeechSynthesizer for GlacialSynthesizer {
    async fn synthesize(&self, _text: &str) -> TtsResult<Vec<u8>> {
        tokio::time::sleep(Duration::from_secs(120)).await;
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const RATE: u32 = 16_000;
const WINDOW_SAMPLES: usize = 480; // 30ms at 16kHz

fn test_config(silence_ms: u64, partial_interval_ms: u64) -> ServerConfig {
    ServerConfig {
        session: SessionConfig {
            silence_ms,
            partial_interval_ms,
            ..SessionConfig::default()
        },
        ..ServerConfig::default()
    }
}

async fn spawn_server(state: Arc<AppState>) -> String {
    let app = routes::api::create_api_router()
        .merge(routes::ws::create_ws_router())
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://127.0.0.1:{}/ws", addr.port())
}

fn speech_frame() -> Vec<u8> {
    let samples = vec![8000i16; WINDOW_SAMPLES];
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn silence_frame() -> Vec<u8> {
    vec![0u8; WINDOW_SAMPLES * 2]
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn recv_json(client: &mut WsClient, patience: Duration) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(patience, client.next()).await.ok()??;
        match message.ok()? {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Collect messages until one matches `stop_type`, or panic on timeout.
async fn collect_until(client: &mut WsClient, stop_type: &str) -> Vec<Value> {
    let mut collected = Vec::new();
    loop {
        let message = recv_json(client, Duration::from_secs(5))
            .await
            .unwrap_or_else(|| panic!("timed out waiting for '{stop_type}'"));
        let done = message["type"] == stop_type;
        collected.push(message);
        if done {
            return collected;
        }
    }
}

fn of_type<'a>(messages: &'a [Value], ty: &str) -> Vec<&'a Value> {
    messages.iter().filter(|m| m["type"] == ty).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silence_only_utterance_finalizes_empty_with_no_reply() {
    let state = AppState::with_engines(
        test_config(300, 1000),
        Arc::new(EnergyClassifier::default()),
        Arc::new(FixedRecognizer("unused")),
        Arc::new(ScriptedGenerator {
            fragments: vec!["should ", "not ", "run."],
            delay: Duration::ZERO,
        }),
        Arc::new(ScrambledSynthesizer),
    );
    let url = spawn_server(state).await;
    let (mut client, _) = connect_async(url).await.expect("connect failed");

    client
        .send(Message::Text(r#"{"type":"start"}"#.into()))
        .await
        .unwrap();
    // 12 silence windows = 360ms, past the 300ms threshold.
    for _ in 0..12 {
        client
            .send(Message::Binary(silence_frame().into()))
            .await
            .unwrap();
    }

    let messages = collect_until(&mut client, "final_transcript").await;
    let finals = of_type(&messages, "final_transcript");
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0]["text"], "");
    assert!(of_type(&messages, "partial_transcript").is_empty());
    assert!(of_type(&messages, "llm_token").is_empty());

    // No reply cycle starts afterwards either.
    assert!(recv_json(&mut client, Duration::from_millis(400)).await.is_none());
}

#[tokio::test]
async fn speech_stop_reply_plays_phrases_in_order_despite_completion_order() {
    // Six fragments spanning two sentence boundaries -> two phrases; the
    // first phrase synthesizes slowest, so completion order is 2 then 1.
    let state = AppState::with_engines(
        test_config(10_000, 300),
        Arc::new(EnergyClassifier::default()),
        Arc::new(FixedRecognizer("tell me a story")),
        Arc::new(ScriptedGenerator {
            fragments: vec!["Hello, ", "world. ", "How ", "are ", "you ", "today?"],
            delay: Duration::from_millis(5),
        }),
        Arc::new(ScrambledSynthesizer),
    );
    let url = spawn_server(state).await;
    let (mut client, _) = connect_async(url).await.expect("connect failed");

    client
        .send(Message::Text(r#"{"type":"start","sample_rate":16000,"cadence":30}"#.into()))
        .await
        .unwrap();
    // 12 speech windows = 360ms of speech; the 300ms partial cadence fires.
    for _ in 0..12 {
        client
            .send(Message::Binary(speech_frame().into()))
            .await
            .unwrap();
    }
    // Give the partial decode a moment before forcing finalization.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client
        .send(Message::Text(r#"{"type":"stop"}"#.into()))
        .await
        .unwrap();

    let messages = collect_until(&mut client, "reply_complete").await;

    // One partial, emitted before the final transcript.
    let partials = of_type(&messages, "partial_transcript");
    assert_eq!(partials.len(), 1);
    assert_eq!(partials[0]["text"], "tell me a story");
    let partial_pos = messages.iter().position(|m| m["type"] == "partial_transcript");
    let final_pos = messages.iter().position(|m| m["type"] == "final_transcript");
    assert!(partial_pos < final_pos);

    // Exactly one final transcript.
    let finals = of_type(&messages, "final_transcript");
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0]["text"], "tell me a story");
    assert_eq!(finals[0]["id"], "utt-1");

    // Tokens relayed in production order, then one terminal marker.
    let tokens: Vec<&Value> = of_type(&messages, "llm_token");
    let texts: String = tokens
        .iter()
        .filter_map(|t| t["text"].as_str())
        .collect();
    assert_eq!(texts, "Hello, world. How are you today?");
    let terminals: Vec<_> = tokens.iter().filter(|t| t["done"] == true).collect();
    assert_eq!(terminals.len(), 1);

    // Phrase 1 audio plays entirely before phrase 2, even though phrase 2
    // finished synthesis first.
    let chunks = of_type(&messages, "tts_chunk");
    assert!(!chunks.is_empty());
    let chunk_seqs: Vec<u64> = chunks.iter().map(|c| c["seq"].as_u64().unwrap()).collect();
    let mut sorted = chunk_seqs.clone();
    sorted.sort();
    assert_eq!(chunk_seqs, sorted, "tts_chunk seqs regressed: {chunk_seqs:?}");
    let phrase1 = BASE64
        .decode(chunks[0]["audio_b64"].as_str().unwrap())
        .unwrap();
    assert_eq!(phrase1, b"Hello, world.");

    let done_seqs: Vec<u64> = of_type(&messages, "tts_phrase_done")
        .iter()
        .map(|d| d["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(done_seqs, vec![1, 2]);

    // One completion: tts_complete, then the reply_complete we stopped on.
    assert_eq!(of_type(&messages, "tts_complete").len(), 1);
    assert_eq!(of_type(&messages, "reply_complete").len(), 1);
    let tts_pos = messages.iter().position(|m| m["type"] == "tts_complete");
    let reply_pos = messages.iter().position(|m| m["type"] == "reply_complete");
    assert!(tts_pos < reply_pos);

    // The latency summary follows as a log line.
    let log = recv_json(&mut client, Duration::from_secs(1))
        .await
        .expect("expected latency log");
    assert_eq!(log["type"], "log");
    assert!(log["message"].as_str().unwrap().contains("latency"));
}

#[tokio::test]
async fn cancel_suppresses_playback_and_allows_immediate_restart() {
    let state = AppState::with_engines(
        test_config(10_000, 10_000),
        Arc::new(EnergyClassifier::default()),
        Arc::new(FixedRecognizer("cancel me")),
        Arc::new(ScriptedGenerator {
            fragments: vec!["First. ", "Second. ", "Third. ", "Fourth."],
            delay: Duration::from_millis(20),
        }),
        Arc::new(GlacialSynthesizer),
    );
    let url = spawn_server(state).await;
    let (mut client, _) = connect_async(url).await.expect("connect failed");

    client
        .send(Message::Text(r#"{"type":"start"}"#.into()))
        .await
        .unwrap();
    for _ in 0..4 {
        client
            .send(Message::Binary(speech_frame().into()))
            .await
            .unwrap();
    }
    client
        .send(Message::Text(r#"{"type":"stop"}"#.into()))
        .await
        .unwrap();

    // Wait for the reply to start streaming, then cancel mid-cycle.
    let messages = collect_until(&mut client, "llm_token").await;
    assert_eq!(of_type(&messages, "final_transcript").len(), 1);
    client
        .send(Message::Text(r#"{"type":"cancel"}"#.into()))
        .await
        .unwrap();

    // The cancellation is acknowledged and nothing of the cycle leaks out:
    // no audio, no phrase markers, no completion events.
    let mut saw_cancel_info = false;
    while let Some(message) = recv_json(&mut client, Duration::from_millis(600)).await {
        match message["type"].as_str().unwrap_or_default() {
            "info" => {
                if message["message"]
                    .as_str()
                    .unwrap_or_default()
                    .contains("cancelled")
                {
                    saw_cancel_info = true;
                }
            }
            "llm_token" => {
                // Tokens already in flight before the cancel landed are fine,
                // but the terminal marker must never arrive.
                assert_eq!(message["done"], false);
            }
            other => panic!("unexpected post-cancel message: {other}"),
        }
    }
    assert!(saw_cancel_info, "expected 'Reply cancelled' info");

    // The session accepts a new utterance immediately.
    client
        .send(Message::Text(r#"{"type":"start"}"#.into()))
        .await
        .unwrap();
    for _ in 0..4 {
        client
            .send(Message::Binary(speech_frame().into()))
            .await
            .unwrap();
    }
    client
        .send(Message::Text(r#"{"type":"stop"}"#.into()))
        .await
        .unwrap();
    let messages = collect_until(&mut client, "final_transcript").await;
    let finals = of_type(&messages, "final_transcript");
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0]["id"], "utt-2");
}

#[tokio::test]
async fn protocol_violations_are_reported_and_survivable() {
    let state = AppState::with_engines(
        test_config(10_000, 10_000),
        Arc::new(EnergyClassifier::default()),
        Arc::new(FixedRecognizer("still alive")),
        Arc::new(ScriptedGenerator {
            fragments: vec!["Fine."],
            delay: Duration::ZERO,
        }),
        Arc::new(ScrambledSynthesizer),
    );
    let url = spawn_server(state).await;
    let (mut client, _) = connect_async(url).await.expect("connect failed");

    // stop before start: rejected with an error, session survives.
    client
        .send(Message::Text(r#"{"type":"stop"}"#.into()))
        .await
        .unwrap();
    let error = recv_json(&mut client, Duration::from_secs(2)).await.unwrap();
    assert_eq!(error["type"], "error");

    // Unknown message type: same story.
    client
        .send(Message::Text(r#"{"type":"reboot"}"#.into()))
        .await
        .unwrap();
    let error = recv_json(&mut client, Duration::from_secs(2)).await.unwrap();
    assert_eq!(error["type"], "error");

    // Binary before start is dropped silently.
    client
        .send(Message::Binary(speech_frame().into()))
        .await
        .unwrap();

    // The session still runs a full round afterwards.
    client
        .send(Message::Text(r#"{"type":"start"}"#.into()))
        .await
        .unwrap();
    for _ in 0..4 {
        client
            .send(Message::Binary(speech_frame().into()))
            .await
            .unwrap();
    }
    client
        .send(Message::Text(r#"{"type":"stop"}"#.into()))
        .await
        .unwrap();
    let messages = collect_until(&mut client, "reply_complete").await;
    assert_eq!(of_type(&messages, "final_transcript").len(), 1);
}
