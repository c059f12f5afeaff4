//! Utterance endpointing over the continuous frame stream.
//!
//! The detector slices incoming samples into fixed-width analysis windows,
//! classifies each one, and drives the silence tracker. It surfaces two
//! things to the session: `PartialDue` on a fixed cadence of accumulated
//! speech (time to request an incremental decode) and `EndOfSpeech` when the
//! trailing-silence threshold elapses (time to finalize). Classifier
//! failures are non-fatal: the window is treated as silence and logged.

use std::sync::Arc;

use tracing::warn;

use super::{SilenceTracker, SilenceTrackerConfig, VadEvent, VoiceActivityClassifier};

/// What the session should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Enough new speech has accumulated to request a partial transcript.
    PartialDue,
    /// The utterance ended; request the final transcript.
    EndOfSpeech,
}

#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    pub sample_rate: u32,
    /// Analysis window width (ms).
    pub window_ms: u32,
    /// Contiguous trailing silence that ends the utterance (ms).
    pub silence_ms: u64,
    /// Accumulated speech between partial-decode requests (ms).
    pub partial_interval_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_ms: 30,
            silence_ms: 700,
            partial_interval_ms: 1000,
        }
    }
}

/// Segments the continuous audio stream into utterances.
pub struct EndpointDetector {
    config: EndpointConfig,
    classifier: Arc<dyn VoiceActivityClassifier>,
    tracker: SilenceTracker,
    window_len: usize,
    pending: Vec<i16>,
    speech_since_partial_ms: u64,
}

impl EndpointDetector {
    pub fn new(config: EndpointConfig, classifier: Arc<dyn VoiceActivityClassifier>) -> Self {
        let window_len =
            (config.sample_rate as usize * config.window_ms as usize / 1000).max(1);
        let tracker = SilenceTracker::new(SilenceTrackerConfig {
            silence_duration_ms: config.silence_ms,
            window_duration_ms: u64::from(config.window_ms),
        });
        Self {
            config,
            classifier,
            tracker,
            window_len,
            pending: Vec::with_capacity(window_len * 2),
            speech_since_partial_ms: 0,
        }
    }

    /// Samples per analysis window.
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Whether any speech was observed this utterance.
    pub fn has_speech(&self) -> bool {
        self.tracker.has_speech()
    }

    /// Feed accepted frame samples; returns the events they triggered, in
    /// order. At most one `EndOfSpeech` is produced per utterance.
    pub fn feed(&mut self, samples: &[i16]) -> Vec<EndpointEvent> {
        let mut events = Vec::new();
        if samples.is_empty() {
            return events;
        }
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.window_len {
            let is_speech = match self
                .classifier
                .is_speech(&self.pending[..self.window_len], self.config.sample_rate)
            {
                Ok(speech) => speech,
                Err(e) => {
                    warn!("voice-activity classification failed, treating window as silence: {e}");
                    false
                }
            };
            self.pending.copy_within(self.window_len.., 0);
            self.pending.truncate(self.pending.len() - self.window_len);

            if is_speech {
                self.speech_since_partial_ms += u64::from(self.config.window_ms);
                if self.speech_since_partial_ms >= self.config.partial_interval_ms {
                    self.speech_since_partial_ms = 0;
                    events.push(EndpointEvent::PartialDue);
                }
            }
            if self.tracker.process(is_speech) == Some(VadEvent::EndOfSpeech) {
                events.push(EndpointEvent::EndOfSpeech);
            }
        }
        events
    }

    /// Begin a new utterance: drop pending samples and tracker state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.tracker.reset();
        self.speech_since_partial_ms = 0;
    }
}
