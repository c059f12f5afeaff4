//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::llm::{create_generator, ReplyGenerator};
use crate::core::stt::{create_recognizer, SpeechRecognizer};
use crate::core::tts::{create_synthesizer, SpeechSynthesizer};
use crate::core::vad::{create_classifier, VoiceActivityClassifier};

/// State shared across handlers. Engines are process-wide and stateless
/// across sessions; each connection builds its own `Session` around them.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub classifier: Arc<dyn VoiceActivityClassifier>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl AppState {
    /// Build state with engines resolved from the configured names.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let classifier = create_classifier(&config.vad_engine)?;
        let recognizer = create_recognizer(&config.stt_engine)?;
        let generator = create_generator(&config.llm_engine)?;
        let synthesizer = create_synthesizer(&config.tts_engine, config.session.sample_rate)?;
        Ok(Arc::new(Self {
            config,
            classifier,
            recognizer,
            generator,
            synthesizer,
        }))
    }

    /// Build state around explicit engine implementations (tests, embeddings).
    pub fn with_engines(
        config: ServerConfig,
        classifier: Arc<dyn VoiceActivityClassifier>,
        recognizer: Arc<dyn SpeechRecognizer>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            classifier,
            recognizer,
            generator,
            synthesizer,
        })
    }
}
