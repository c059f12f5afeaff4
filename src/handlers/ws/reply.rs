//! The reply cycle: token forwarding, phrase aggregation, ordered playback.
//!
//! One cycle runs per final transcript. Tokens are relayed to the client in
//! production order while the aggregator closes phrases behind them; closed
//! phrases feed the bounded synthesis pipeline, whose reassembled audio is
//! forwarded here in strict phrase order. The cycle completes only when the
//! token stream has ended AND every dispatched phrase has been played; the
//! assembled reply is reported back to the session for memory commit only
//! when the stream terminated normally and the cycle was not cancelled.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::llm::{ChatMessage, ReplyGenerator};
use crate::core::metrics::LatencyMetrics;
use crate::core::tts::{
    PhraseAggregator, PhraseOptions, PipelineOptions, PlaybackEvent, SpeechSynthesizer,
    SynthesisPipeline,
};

use super::messages::OutgoingMessage;
use super::session::SessionEvent;

#[derive(Debug, Clone)]
pub(crate) struct ReplyOptions {
    pub phrase: PhraseOptions,
    pub pipeline: PipelineOptions,
    /// Inter-fragment pause that flushes the pending phrase.
    pub phrase_pause: Duration,
}

/// Everything a reply cycle needs, captured at spawn time.
pub(crate) struct CycleContext {
    pub cycle: u64,
    pub cancel: CancellationToken,
    pub outbound: mpsc::Sender<OutgoingMessage>,
    pub events: mpsc::Sender<SessionEvent>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub metrics: Arc<Mutex<LatencyMetrics>>,
    pub history: Vec<ChatMessage>,
    pub options: ReplyOptions,
}

pub(crate) async fn run_reply_cycle(ctx: CycleContext) {
    let CycleContext {
        cycle,
        cancel,
        outbound,
        events,
        generator,
        synthesizer,
        metrics,
        history,
        options,
    } = ctx;

    let mime = synthesizer.mime();
    let (playback_tx, playback_rx) = mpsc::channel::<PlaybackEvent>(64);
    let (pipeline, pipeline_handle) = SynthesisPipeline::spawn(
        synthesizer,
        options.pipeline,
        cancel.clone(),
        playback_tx,
    );
    let forwarder = tokio::spawn(forward_playback(
        playback_rx,
        outbound.clone(),
        cancel.clone(),
        metrics.clone(),
        mime,
    ));

    let mut aggregator = PhraseAggregator::new(options.phrase);
    let mut assembled = String::new();
    let mut terminated = false;

    match generator.stream(history).await {
        Ok(mut stream) => loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(cycle, "reply cycle cancelled");
                    break;
                }
                next = tokio::time::timeout(options.phrase_pause, stream.next()) => next,
            };
            match next {
                // Inter-fragment pause: speak what we have so far.
                Err(_) => {
                    if let Some(phrase) = aggregator.flush() {
                        debug!(cycle, seq = phrase.seq, "phrase closed by pause");
                        if !pipeline.dispatch(phrase).await {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    terminated = true;
                    break;
                }
                Ok(Some(Ok(token))) => {
                    metrics.lock().mark_first_token();
                    if outbound
                        .send(OutgoingMessage::token(token.clone()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    assembled.push_str(&token);
                    if let Some(phrase) = aggregator.push(&token) {
                        debug!(cycle, seq = phrase.seq, "phrase closed");
                        if !pipeline.dispatch(phrase).await {
                            break;
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(cycle, "reply generation failed mid-stream: {e}");
                    let _ = outbound
                        .send(OutgoingMessage::error("Reply generation failed"))
                        .await;
                    break;
                }
            }
        },
        Err(e) => {
            warn!(cycle, "reply generation could not start: {e}");
            let _ = outbound
                .send(OutgoingMessage::error("Reply generation failed"))
                .await;
        }
    }

    // Residual text becomes the last phrase, even after a mid-stream error.
    if !cancel.is_cancelled() {
        if let Some(phrase) = aggregator.flush() {
            debug!(cycle, seq = phrase.seq, "residual phrase flushed");
            let _ = pipeline.dispatch(phrase).await;
        }
    }

    // End of phrase stream; wait until every dispatched phrase has played.
    drop(pipeline);
    let summary = pipeline_handle.await.unwrap_or_default();
    let _ = forwarder.await;

    if cancel.is_cancelled() {
        return;
    }

    debug!(
        cycle,
        dispatched = summary.dispatched,
        played = summary.played,
        "reply cycle delivered"
    );
    let _ = outbound.send(OutgoingMessage::TtsComplete).await;
    let _ = outbound.send(OutgoingMessage::token_done()).await;
    metrics.lock().mark_cycle_complete();

    let reply = assembled.trim().to_string();
    let reply = (terminated && !reply.is_empty()).then_some(reply);
    let _ = events.send(SessionEvent::CycleComplete { cycle, reply }).await;
}

/// Relay ordered playback events to the client.
async fn forward_playback(
    mut playback: mpsc::Receiver<PlaybackEvent>,
    outbound: mpsc::Sender<OutgoingMessage>,
    cancel: CancellationToken,
    metrics: Arc<Mutex<LatencyMetrics>>,
    mime: &'static str,
) {
    while let Some(event) = playback.recv().await {
        if cancel.is_cancelled() {
            continue;
        }
        let message = match event {
            PlaybackEvent::Audio { seq, index, chunk } => {
                metrics.lock().mark_first_audio();
                OutgoingMessage::TtsChunk {
                    seq,
                    index,
                    audio_b64: BASE64.encode(&chunk),
                    mime: mime.to_string(),
                }
            }
            PlaybackEvent::PhraseFailed { seq, error } => {
                OutgoingMessage::error(format!("Speech synthesis failed for phrase {seq}: {error}"))
            }
            PlaybackEvent::PhraseDone { seq } => OutgoingMessage::TtsPhraseDone { seq },
        };
        if outbound.send(message).await.is_err() {
            break;
        }
    }
}
