//! Voice-activity classification.
//!
//! The endpoint detector consumes fixed-width analysis windows and asks a
//! `VoiceActivityClassifier` whether each one contains speech. The
//! classifier is a collaborator seam: the built-in `EnergyClassifier` is a
//! plain RMS gate, and heavier models plug in behind the same trait.

mod endpoint;
mod silence_tracker;

pub use endpoint::{EndpointConfig, EndpointDetector, EndpointEvent};
pub use silence_tracker::{SilenceTracker, SilenceTrackerConfig, VadEvent};

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VadError {
    #[error("classifier failure: {0}")]
    Classifier(String),
}

pub type VadResult<T> = Result<T, VadError>;

/// Classifies one analysis window as speech or silence.
pub trait VoiceActivityClassifier: Send + Sync {
    fn is_speech(&self, window: &[i16], sample_rate: u32) -> VadResult<bool>;
}

/// RMS energy gate over normalized samples.
pub struct EnergyClassifier {
    /// Normalized RMS above which a window counts as speech.
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        // Comfortably above line noise, well below quiet speech.
        Self::new(0.01)
    }
}

impl VoiceActivityClassifier for EnergyClassifier {
    fn is_speech(&self, window: &[i16], _sample_rate: u32) -> VadResult<bool> {
        if window.is_empty() {
            return Ok(false);
        }
        let energy: f64 = window
            .iter()
            .map(|&s| {
                let v = f64::from(s) / 32768.0;
                v * v
            })
            .sum();
        let rms = (energy / window.len() as f64).sqrt();
        Ok(rms > f64::from(self.threshold))
    }
}

/// Create a voice-activity classifier by name.
///
/// Supported: `"energy"` (built-in RMS gate).
pub fn create_classifier(name: &str) -> VadResult<Arc<dyn VoiceActivityClassifier>> {
    match name.to_lowercase().as_str() {
        "energy" => Ok(Arc::new(EnergyClassifier::default())),
        other => Err(VadError::Classifier(format!(
            "unsupported VAD classifier: {other}. Supported classifiers: energy"
        ))),
    }
}
