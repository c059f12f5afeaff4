//! Per-utterance latency instrumentation.
//!
//! Timestamps are recorded at the milestones of one utterance/reply round:
//! utterance start (the anchor), first partial transcript, final transcript,
//! first reply token, first synthesized audio, and cycle completion. Derived
//! latencies are deltas from the anchor. State resets when a new utterance
//! starts and is otherwise only cleared explicitly.

use std::time::{Duration, Instant};

/// First-wins latency marks for one utterance.
#[derive(Debug, Default)]
pub struct LatencyMetrics {
    anchor: Option<Instant>,
    first_partial: Option<Duration>,
    final_transcript: Option<Duration>,
    first_token: Option<Duration>,
    first_audio: Option<Duration>,
    cycle_complete: Option<Duration>,
}

impl LatencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new utterance: clear all marks and set the anchor.
    pub fn start_utterance(&mut self) {
        *self = Self {
            anchor: Some(Instant::now()),
            ..Self::default()
        };
    }

    /// Drop all marks including the anchor.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn mark(slot: &mut Option<Duration>, anchor: Option<Instant>) {
        if slot.is_none() {
            if let Some(anchor) = anchor {
                *slot = Some(anchor.elapsed());
            }
        }
    }

    pub fn mark_first_partial(&mut self) {
        Self::mark(&mut self.first_partial, self.anchor);
    }

    pub fn mark_final_transcript(&mut self) {
        Self::mark(&mut self.final_transcript, self.anchor);
    }

    pub fn mark_first_token(&mut self) {
        Self::mark(&mut self.first_token, self.anchor);
    }

    pub fn mark_first_audio(&mut self) {
        Self::mark(&mut self.first_audio, self.anchor);
    }

    pub fn mark_cycle_complete(&mut self) {
        Self::mark(&mut self.cycle_complete, self.anchor);
    }

    pub fn first_partial(&self) -> Option<Duration> {
        self.first_partial
    }

    pub fn final_transcript(&self) -> Option<Duration> {
        self.final_transcript
    }

    pub fn first_token(&self) -> Option<Duration> {
        self.first_token
    }

    pub fn first_audio(&self) -> Option<Duration> {
        self.first_audio
    }

    pub fn cycle_complete(&self) -> Option<Duration> {
        self.cycle_complete
    }

    /// One-line summary of the recorded deltas, or None when no utterance
    /// was anchored or nothing was marked.
    pub fn summary(&self) -> Option<String> {
        self.anchor?;
        let mut parts = Vec::new();
        for (name, value) in [
            ("first_partial", self.first_partial),
            ("final_transcript", self.final_transcript),
            ("first_token", self.first_token),
            ("first_audio", self.first_audio),
            ("cycle_complete", self.cycle_complete),
        ] {
            if let Some(delta) = value {
                parts.push(format!("{name}={}ms", delta.as_millis()));
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!("latency {}", parts.join(" ")))
    }
}
