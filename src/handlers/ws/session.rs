//! Per-connection session orchestration.
//!
//! One `Session` is constructed per WebSocket connection and owns all of the
//! connection's mutable state: the protocol state machine, the rolling audio
//! buffer, the endpoint detector, conversation memory, latency metrics, and
//! the at-most-one active reply cycle. Every mutation happens on the socket
//! dispatch loop — spawned decode and cycle tasks report back through the
//! session's internal event channel, so there is exactly one writer.
//!
//! Protocol states: `Idle -> Capturing -> Finalizing -> Responding -> Idle`,
//! with `cancel` passing through `Cancelled` back to `Idle`, and `Closed`
//! terminal. Control messages outside their valid states are dropped with a
//! warning; binary frames outside `Capturing` are dropped silently (logged).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::core::audio::{pcm_to_samples, RollingBuffer};
use crate::core::llm::{ChatMessage, ReplyGenerator};
use crate::core::metrics::LatencyMetrics;
use crate::core::stt::SpeechRecognizer;
use crate::core::tts::{PhraseOptions, PipelineOptions, SpeechSynthesizer};
use crate::core::vad::{EndpointConfig, EndpointDetector, EndpointEvent, VoiceActivityClassifier};
use crate::state::AppState;

use super::error::SessionError;
use super::messages::{IncomingMessage, OutgoingMessage};
use super::reply::{run_reply_cycle, CycleContext, ReplyOptions};

/// Protocol state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Finalizing,
    Responding,
    Cancelled,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Finalizing => "finalizing",
            SessionState::Responding => "responding",
            SessionState::Cancelled => "cancelled",
            SessionState::Closed => "closed",
        }
    }
}

/// Internal events reported by spawned decode and cycle tasks. Each carries
/// the utterance or cycle it belongs to so stale completions are absorbed.
#[derive(Debug)]
pub enum SessionEvent {
    PartialReady { utterance: u64, text: String },
    PartialFailed { utterance: u64, error: String },
    FinalReady { utterance: u64, text: String },
    FinalFailed { utterance: u64, error: String },
    CycleComplete { cycle: u64, reply: Option<String> },
}

struct CycleHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// All state of one WebSocket voice session.
pub struct Session {
    id: String,
    config: SessionConfig,
    state: SessionState,
    outbound: mpsc::Sender<OutgoingMessage>,
    events: mpsc::Sender<SessionEvent>,
    recognizer: Arc<dyn SpeechRecognizer>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    audio: RollingBuffer,
    detector: EndpointDetector,
    conversation: Vec<ChatMessage>,
    metrics: Arc<Mutex<LatencyMetrics>>,
    utterance: u64,
    partial_in_flight: Arc<AtomicBool>,
    last_partial: String,
    cycle: Option<CycleHandle>,
    next_cycle: u64,
}

impl Session {
    pub fn new(
        app: &AppState,
        outbound: mpsc::Sender<OutgoingMessage>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let config = app.config.session.clone();
        Self::with_engines(
            config,
            app.classifier.clone(),
            app.recognizer.clone(),
            app.generator.clone(),
            app.synthesizer.clone(),
            outbound,
            events,
        )
    }

    pub fn with_engines(
        config: SessionConfig,
        classifier: Arc<dyn VoiceActivityClassifier>,
        recognizer: Arc<dyn SpeechRecognizer>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        outbound: mpsc::Sender<OutgoingMessage>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let detector = EndpointDetector::new(
            EndpointConfig {
                sample_rate: config.sample_rate,
                window_ms: config.window_ms,
                silence_ms: config.silence_ms,
                partial_interval_ms: config.partial_interval_ms,
            },
            classifier,
        );
        let audio = RollingBuffer::new(config.sample_rate, config.max_buffer);
        let id = Uuid::new_v4().to_string();
        info!(session = %id, "voice session created");
        Self {
            id,
            config,
            state: SessionState::Idle,
            outbound,
            events,
            recognizer,
            generator,
            synthesizer,
            audio,
            detector,
            conversation: Vec::new(),
            metrics: Arc::new(Mutex::new(LatencyMetrics::new())),
            utterance: 0,
            partial_in_flight: Arc::new(AtomicBool::new(false)),
            last_partial: String::new(),
            cycle: None,
            next_cycle: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Route one JSON control message.
    pub async fn handle_text(&mut self, text: &str) {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                let error = SessionError::InvalidMessage(e.to_string());
                warn!(session = %self.id, "{error}");
                self.send(OutgoingMessage::error(error.to_string())).await;
                return;
            }
        };
        match message {
            IncomingMessage::Start {
                sample_rate,
                cadence,
            } => self.handle_start(sample_rate, cadence).await,
            IncomingMessage::Stop => self.handle_stop().await,
            IncomingMessage::Cancel => self.handle_cancel().await,
        }
    }

    async fn handle_start(&mut self, sample_rate: Option<u32>, cadence: Option<u32>) {
        if self.state != SessionState::Idle {
            self.reject("start").await;
            return;
        }

        self.utterance += 1;
        self.state = SessionState::Capturing;
        self.metrics.lock().start_utterance();
        self.detector.reset();
        self.audio.clear();
        self.last_partial.clear();
        info!(session = %self.id, utterance = self.utterance, "capture started");

        if let Some(rate) = sample_rate {
            if rate != self.config.sample_rate {
                self.send(OutgoingMessage::info(format!(
                    "Server expects {}Hz; received {}Hz.",
                    self.config.sample_rate, rate
                )))
                .await;
            }
        }
        if let Some(cadence) = cadence {
            debug!(session = %self.id, cadence_ms = cadence, "client frame cadence");
        }
    }

    /// Ingest one binary audio frame.
    pub async fn handle_binary(&mut self, frame: Bytes) {
        if self.state != SessionState::Capturing {
            debug!(
                session = %self.id,
                state = self.state.as_str(),
                bytes = frame.len(),
                "audio frame dropped outside capture"
            );
            return;
        }
        let samples = pcm_to_samples(&frame);
        if samples.is_empty() {
            return;
        }

        let over_ceiling = self.audio.append(&samples);
        for event in self.detector.feed(&samples) {
            match event {
                EndpointEvent::PartialDue => self.spawn_partial_decode(),
                EndpointEvent::EndOfSpeech => self.begin_finalize("endpoint silence").await,
            }
        }
        if over_ceiling && self.state == SessionState::Capturing {
            warn!(session = %self.id, "rolling buffer ceiling exceeded, forcing finalization");
            self.begin_finalize("buffer ceiling").await;
        }
    }

    async fn handle_stop(&mut self) {
        if self.state != SessionState::Capturing {
            self.reject("stop").await;
            return;
        }
        self.begin_finalize("stop").await;
    }

    async fn handle_cancel(&mut self) {
        if !matches!(
            self.state,
            SessionState::Capturing | SessionState::Responding
        ) {
            self.reject("cancel").await;
            return;
        }

        self.state = SessionState::Cancelled;
        let had_cycle = self.abort_cycle();
        self.audio.clear();
        self.detector.reset();
        self.last_partial.clear();
        if had_cycle {
            self.send(OutgoingMessage::info("Reply cancelled")).await;
        }
        info!(session = %self.id, "cycle cancelled, session idle");
        self.state = SessionState::Idle;
    }

    /// Handle one internal event from a spawned task. Events tagged with a
    /// superseded utterance or cycle are absorbed here, never replayed.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PartialReady { utterance, text } => {
                if utterance != self.utterance || self.state != SessionState::Capturing {
                    debug!(session = %self.id, utterance, "stale partial dropped");
                    return;
                }
                if text.is_empty() || text == self.last_partial {
                    return;
                }
                self.metrics.lock().mark_first_partial();
                self.last_partial = text.clone();
                self.send(OutgoingMessage::PartialTranscript { text }).await;
            }
            SessionEvent::PartialFailed { utterance, error } => {
                if utterance != self.utterance {
                    return;
                }
                warn!(session = %self.id, "partial transcription failed: {error}");
                self.send(OutgoingMessage::error("Partial transcription failed"))
                    .await;
            }
            SessionEvent::FinalReady { utterance, text } => {
                if utterance != self.utterance || self.state != SessionState::Finalizing {
                    debug!(session = %self.id, utterance, "stale final dropped");
                    return;
                }
                self.metrics.lock().mark_final_transcript();
                let id = format!("utt-{utterance}");
                info!(session = %self.id, %id, "final transcript: {text:?}");
                self.send(OutgoingMessage::FinalTranscript {
                    text: text.clone(),
                    id,
                })
                .await;

                let text = text.trim().to_string();
                if text.is_empty() {
                    // Nothing to reply to; the utterance is over.
                    self.state = SessionState::Idle;
                    return;
                }
                self.conversation.push(ChatMessage::user(text));
                self.start_cycle();
                self.state = SessionState::Responding;
            }
            SessionEvent::FinalFailed { utterance, error } => {
                if utterance != self.utterance || self.state != SessionState::Finalizing {
                    return;
                }
                warn!(session = %self.id, "final transcription failed: {error}");
                self.send(OutgoingMessage::error("Final transcription failed"))
                    .await;
                self.state = SessionState::Idle;
            }
            SessionEvent::CycleComplete { cycle, reply } => {
                if self.cycle.as_ref().map(|c| c.id) != Some(cycle) {
                    debug!(session = %self.id, cycle, "stale cycle completion absorbed");
                    return;
                }
                self.cycle = None;
                if let Some(reply) = reply {
                    self.conversation.push(ChatMessage::assistant(reply));
                }
                self.send(OutgoingMessage::ReplyComplete).await;
                let summary = self.metrics.lock().summary();
                if let Some(summary) = summary {
                    self.send(OutgoingMessage::log(summary)).await;
                }
                if self.state == SessionState::Responding {
                    self.state = SessionState::Idle;
                }
            }
        }
    }

    /// Tear down on channel close or error: abort in-flight work and release
    /// everything the session owns. Fatal to this session only.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.abort_cycle();
        self.audio.clear();
        self.detector.reset();
        if let Some(summary) = self.metrics.lock().summary() {
            info!(session = %self.id, "{summary}");
        }
        self.state = SessionState::Closed;
        info!(session = %self.id, "voice session closed");
    }

    /// Request an incremental decode over the trailing window. At most one
    /// partial decode is in flight at a time; extra requests are skipped.
    fn spawn_partial_decode(&mut self) {
        if self.partial_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let window = self.audio.window(self.config.partial_window);
        if window.is_empty() {
            self.partial_in_flight.store(false, Ordering::Release);
            return;
        }

        let recognizer = self.recognizer.clone();
        let events = self.events.clone();
        let in_flight = self.partial_in_flight.clone();
        let utterance = self.utterance;
        let sample_rate = self.config.sample_rate;
        tokio::spawn(async move {
            let result = recognizer.transcribe(&window, sample_rate).await;
            in_flight.store(false, Ordering::Release);
            let event = match result {
                Ok(text) => SessionEvent::PartialReady { utterance, text },
                Err(e) => SessionEvent::PartialFailed {
                    utterance,
                    error: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        });
    }

    /// Snapshot the utterance, clear capture state, and decode the final
    /// transcript off the dispatch loop.
    async fn begin_finalize(&mut self, trigger: &'static str) {
        if self.state != SessionState::Capturing {
            return;
        }
        self.state = SessionState::Finalizing;
        info!(session = %self.id, utterance = self.utterance, trigger, "finalizing utterance");

        let window = self.audio.window(self.config.final_window);
        self.audio.clear();
        self.detector.reset();
        self.last_partial.clear();

        let recognizer = self.recognizer.clone();
        let events = self.events.clone();
        let utterance = self.utterance;
        let sample_rate = self.config.sample_rate;
        tokio::spawn(async move {
            let result = if window.is_empty() {
                Ok(String::new())
            } else {
                recognizer.transcribe(&window, sample_rate).await
            };
            let event = match result {
                Ok(text) => SessionEvent::FinalReady { utterance, text },
                Err(e) => SessionEvent::FinalFailed {
                    utterance,
                    error: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        });
    }

    /// Spawn the reply cycle for the just-finalized transcript.
    fn start_cycle(&mut self) {
        self.next_cycle += 1;
        let cancel = CancellationToken::new();
        let context = CycleContext {
            cycle: self.next_cycle,
            cancel: cancel.clone(),
            outbound: self.outbound.clone(),
            events: self.events.clone(),
            generator: self.generator.clone(),
            synthesizer: self.synthesizer.clone(),
            metrics: self.metrics.clone(),
            history: self.conversation.clone(),
            options: ReplyOptions {
                phrase: PhraseOptions {
                    max_chars: self.config.phrase_max_chars,
                    ..PhraseOptions::default()
                },
                pipeline: PipelineOptions {
                    workers: self.config.synthesis_workers,
                },
                phrase_pause: self.config.phrase_pause,
            },
        };
        let task = tokio::spawn(run_reply_cycle(context));
        self.cycle = Some(CycleHandle {
            id: self.next_cycle,
            cancel,
            task,
        });
    }

    /// Cancel the active cycle, if any. In-flight collaborator calls observe
    /// the token and wind down; their late output is gated off by it.
    fn abort_cycle(&mut self) -> bool {
        if let Some(cycle) = self.cycle.take() {
            cycle.cancel.cancel();
            cycle.task.abort();
            true
        } else {
            false
        }
    }

    /// Report a control message that is invalid for the current state. The
    /// violation is dropped with a warning; the session continues.
    async fn reject(&self, message: &'static str) {
        let error = SessionError::InvalidState {
            message,
            state: self.state.as_str(),
        };
        warn!(session = %self.id, "{error}");
        self.send(OutgoingMessage::error(error.to_string())).await;
    }

    async fn send(&self, message: OutgoingMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!(session = %self.id, "outbound channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::core::llm::EchoGenerator;
    use crate::core::stt::{SttError, SttResult};
    use crate::core::tts::SilenceSynthesizer;
    use crate::core::vad::EnergyClassifier;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedRecognizer(&'static str);

    #[async_trait]
    impl SpeechRecognizer for FixedRecognizer {
        async fn transcribe(&self, _pcm: &[i16], _rate: u32) -> SttResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingRecognizer;

    #[async_trait]
    impl SpeechRecognizer for FailingRecognizer {
        async fn transcribe(&self, _pcm: &[i16], _rate: u32) -> SttResult<String> {
            Err(SttError::Decode("engine offline".into()))
        }
    }

    struct Harness {
        session: Session,
        outbound: mpsc::Receiver<OutgoingMessage>,
        events: mpsc::Receiver<SessionEvent>,
    }

    fn harness_with(recognizer: Arc<dyn SpeechRecognizer>) -> Harness {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (events_tx, events_rx) = mpsc::channel(64);
        let config = SessionConfig {
            silence_ms: 90,
            partial_interval_ms: 10_000,
            phrase_pause: Duration::from_millis(200),
            ..SessionConfig::default()
        };
        let session = Session::with_engines(
            config,
            Arc::new(EnergyClassifier::default()),
            recognizer,
            Arc::new(EchoGenerator::new(Duration::ZERO)),
            Arc::new(SilenceSynthesizer),
            outbound_tx,
            events_tx,
        );
        Harness {
            session,
            outbound: outbound_rx,
            events: events_rx,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(FixedRecognizer("hello there")))
    }

    fn speech_frame(windows: usize) -> Bytes {
        crate::core::audio::samples_to_pcm(&vec![8000i16; 480 * windows])
    }

    fn silence_frame(windows: usize) -> Bytes {
        crate::core::audio::samples_to_pcm(&vec![0i16; 480 * windows])
    }

    async fn start(h: &mut Harness) {
        h.session.handle_text(r#"{"type":"start"}"#).await;
        assert_eq!(h.session.state(), SessionState::Capturing);
    }

    /// Pump internal events until the final transcript lands.
    async fn drive_to_final(h: &mut Harness) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), h.events.recv())
                .await
                .expect("event wait timed out")
                .expect("events channel closed");
            let is_final = matches!(event, SessionEvent::FinalReady { .. });
            h.session.handle_event(event).await;
            if is_final {
                return;
            }
        }
    }

    #[tokio::test]
    async fn frames_outside_capture_are_dropped_silently() {
        let mut h = harness();
        h.session.handle_binary(speech_frame(4)).await;
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.outbound.try_recv().is_err());
        assert!(h.session.audio.is_empty());
    }

    #[tokio::test]
    async fn stop_outside_capture_is_rejected_with_error() {
        let mut h = harness();
        h.session.handle_text(r#"{"type":"stop"}"#).await;
        assert!(matches!(
            h.outbound.try_recv(),
            Ok(OutgoingMessage::Error { .. })
        ));
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn start_while_capturing_is_rejected() {
        let mut h = harness();
        start(&mut h).await;
        h.session.handle_text(r#"{"type":"start"}"#).await;
        assert!(matches!(
            h.outbound.try_recv(),
            Ok(OutgoingMessage::Error { .. })
        ));
        // Still capturing the original utterance.
        assert_eq!(h.session.state(), SessionState::Capturing);
        assert_eq!(h.session.utterance, 1);
    }

    #[tokio::test]
    async fn mismatched_sample_rate_gets_info() {
        let mut h = harness();
        h.session
            .handle_text(r#"{"type":"start","sample_rate":44100}"#)
            .await;
        assert!(matches!(
            h.outbound.try_recv(),
            Ok(OutgoingMessage::Info { .. })
        ));
    }

    #[tokio::test]
    async fn stop_finalizes_and_commits_user_turn() {
        let mut h = harness();
        start(&mut h).await;
        h.session.handle_binary(speech_frame(4)).await;
        h.session.handle_text(r#"{"type":"stop"}"#).await;
        assert_eq!(h.session.state(), SessionState::Finalizing);

        drive_to_final(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Responding);
        assert_eq!(h.session.conversation.len(), 1);
        assert_eq!(h.session.conversation[0].content, "hello there");
    }

    #[tokio::test]
    async fn empty_final_transcript_starts_no_cycle() {
        let mut h = harness_with(Arc::new(FixedRecognizer("")));
        start(&mut h).await;
        h.session.handle_binary(silence_frame(2)).await;
        h.session.handle_text(r#"{"type":"stop"}"#).await;
        drive_to_final(&mut h).await;

        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.session.cycle.is_none());
        assert!(h.session.conversation.is_empty());
        // The empty final transcript is still emitted, exactly once.
        let mut finals = 0;
        while let Ok(msg) = h.outbound.try_recv() {
            if let OutgoingMessage::FinalTranscript { text, .. } = msg {
                assert!(text.is_empty());
                finals += 1;
            }
        }
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn failed_final_decode_is_nonfatal() {
        let mut h = harness_with(Arc::new(FailingRecognizer));
        start(&mut h).await;
        h.session.handle_binary(speech_frame(4)).await;
        h.session.handle_text(r#"{"type":"stop"}"#).await;

        let event = h.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::FinalFailed { .. }));
        h.session.handle_event(event).await;
        assert_eq!(h.session.state(), SessionState::Idle);

        // The session accepts a new utterance afterwards.
        start(&mut h).await;
    }

    #[tokio::test]
    async fn cancel_aborts_cycle_and_never_commits() {
        let mut h = harness();
        start(&mut h).await;
        h.session.handle_binary(speech_frame(4)).await;
        h.session.handle_text(r#"{"type":"stop"}"#).await;
        drive_to_final(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Responding);

        h.session.handle_text(r#"{"type":"cancel"}"#).await;
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.session.cycle.is_none());
        // Only the user turn is in memory; no partial reply was committed.
        assert_eq!(h.session.conversation.len(), 1);

        // A late completion tagged to the aborted cycle is absorbed.
        h.session
            .handle_event(SessionEvent::CycleComplete {
                cycle: 1,
                reply: Some("stale".into()),
            })
            .await;
        assert_eq!(h.session.conversation.len(), 1);

        // And the session accepts a new start immediately.
        start(&mut h).await;
    }

    #[tokio::test]
    async fn stale_partial_from_previous_utterance_is_dropped() {
        let mut h = harness();
        start(&mut h).await;
        h.session
            .handle_event(SessionEvent::PartialReady {
                utterance: 0,
                text: "ghost".into(),
            })
            .await;
        while let Ok(msg) = h.outbound.try_recv() {
            assert!(!matches!(msg, OutgoingMessage::PartialTranscript { .. }));
        }
    }

    #[tokio::test]
    async fn duplicate_partial_text_is_not_reemitted() {
        let mut h = harness();
        start(&mut h).await;
        for _ in 0..2 {
            h.session
                .handle_event(SessionEvent::PartialReady {
                    utterance: 1,
                    text: "hello".into(),
                })
                .await;
        }
        let mut partials = 0;
        while let Ok(msg) = h.outbound.try_recv() {
            if matches!(msg, OutgoingMessage::PartialTranscript { .. }) {
                partials += 1;
            }
        }
        assert_eq!(partials, 1);
    }

    #[tokio::test]
    async fn reply_commit_happens_only_on_matching_cycle_completion() {
        let mut h = harness();
        start(&mut h).await;
        h.session.handle_binary(speech_frame(4)).await;
        h.session.handle_text(r#"{"type":"stop"}"#).await;
        drive_to_final(&mut h).await;

        // Let the real cycle run to completion.
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), h.events.recv())
                .await
                .expect("cycle completion timed out")
                .expect("events channel closed");
            let done = matches!(event, SessionEvent::CycleComplete { .. });
            h.session.handle_event(event).await;
            if done {
                break;
            }
        }
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.conversation.len(), 2);
        assert_eq!(h.session.conversation[1].content, "hello there");
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let mut h = harness();
        start(&mut h).await;
        h.session.close();
        assert_eq!(h.session.state(), SessionState::Closed);
        h.session.handle_binary(speech_frame(1)).await;
        assert!(h.session.audio.is_empty());
    }
}
