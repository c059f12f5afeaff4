//! Silence duration tracking for utterance endpointing.
//!
//! The tracker watches the per-window speech/silence classification and
//! decides when an utterance has ended. One utterance moves through
//! `Idle -> Speech -> TrailingSilence -> EndOfSpeech`; a speech window during
//! trailing silence resets the timer, and `EndOfSpeech` is latched so it
//! fires at most once until `reset`.
//!
//! The silence timer runs from utterance start, not from the first speech
//! window: an utterance that never contains speech still ends once
//! contiguous silence exceeds the threshold, producing an (empty) final
//! transcript upstream.

use tracing::debug;

/// Event emitted by the tracker when a window causes a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// First speech window of the utterance.
    SpeechStart,
    /// First silence window after speech; the trailing-silence timer starts.
    SilenceDetected,
    /// Speech resumed before the trailing-silence threshold elapsed.
    SpeechResumed,
    /// Contiguous silence exceeded the threshold; the utterance is over.
    EndOfSpeech,
}

#[derive(Debug, Clone, Copy)]
pub struct SilenceTrackerConfig {
    /// Contiguous silence required to end the utterance (ms).
    pub silence_duration_ms: u64,
    /// Duration represented by one analysis window (ms).
    pub window_duration_ms: u64,
}

impl Default for SilenceTrackerConfig {
    fn default() -> Self {
        Self {
            silence_duration_ms: 700,
            window_duration_ms: 30,
        }
    }
}

/// Per-utterance speech/silence state machine.
pub struct SilenceTracker {
    config: SilenceTrackerConfig,
    speaking: bool,
    speech_ms: u64,
    silence_ms: u64,
    end_fired: bool,
}

impl SilenceTracker {
    pub fn new(config: SilenceTrackerConfig) -> Self {
        Self {
            config,
            speaking: false,
            speech_ms: 0,
            silence_ms: 0,
            end_fired: false,
        }
    }

    /// Advance the state machine by one classified window.
    pub fn process(&mut self, is_speech: bool) -> Option<VadEvent> {
        let window = self.config.window_duration_ms;

        if is_speech {
            let had_speech = self.speech_ms > 0;
            self.silence_ms = 0;
            let was_speaking = self.speaking;
            self.speaking = true;
            self.speech_ms += window;

            if was_speaking || self.end_fired {
                return None;
            }
            if had_speech {
                debug!("speech resumed before silence threshold");
                return Some(VadEvent::SpeechResumed);
            }
            debug!("speech started");
            return Some(VadEvent::SpeechStart);
        }

        self.silence_ms += window;
        if self.speaking {
            self.speaking = false;
            if !self.end_fired {
                debug!("silence after {}ms of speech", self.speech_ms);
                return Some(VadEvent::SilenceDetected);
            }
            return None;
        }

        if !self.end_fired && self.silence_ms >= self.config.silence_duration_ms {
            self.end_fired = true;
            debug!(
                "end of speech after {}ms contiguous silence ({}ms speech)",
                self.silence_ms, self.speech_ms
            );
            return Some(VadEvent::EndOfSpeech);
        }
        None
    }

    /// Whether any speech was observed this utterance.
    pub fn has_speech(&self) -> bool {
        self.speech_ms > 0
    }

    /// Accumulated speech duration this utterance (ms).
    pub fn speech_ms(&self) -> u64 {
        self.speech_ms
    }

    /// Current contiguous silence duration (ms).
    pub fn silence_ms(&self) -> u64 {
        self.silence_ms
    }

    /// Begin a new utterance.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.speech_ms = 0;
        self.silence_ms = 0;
        self.end_fired = false;
    }
}

impl Default for SilenceTracker {
    fn default() -> Self {
        Self::new(SilenceTrackerConfig::default())
    }
}
