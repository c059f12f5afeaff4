//! Server and session configuration.
//!
//! Everything is read from the environment (a `.env` file is honored) with
//! typed defaults, so a bare `voxstream` binary comes up with the built-in
//! engines and sane streaming parameters.

use std::env;
use std::time::Duration;

/// Tunables applied to every session on this server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target PCM sample rate (Hz) for inbound frames and decode windows.
    pub sample_rate: u32,
    /// Voice-activity analysis window width (ms).
    pub window_ms: u32,
    /// Contiguous trailing silence that ends an utterance (ms).
    pub silence_ms: u64,
    /// Accumulated speech between partial-decode requests (ms).
    pub partial_interval_ms: u64,
    /// Trailing window handed to the recognizer for partials.
    pub partial_window: Duration,
    /// Window handed to the recognizer for the final decode.
    pub final_window: Duration,
    /// Rolling-buffer ceiling; exceeding it forces finalization.
    pub max_buffer: Duration,
    /// Phrase length threshold (chars).
    pub phrase_max_chars: usize,
    /// Inter-fragment pause that flushes the pending phrase.
    pub phrase_pause: Duration,
    /// Concurrent synthesis jobs per session.
    pub synthesis_workers: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_ms: 30,
            silence_ms: 700,
            partial_interval_ms: 1000,
            partial_window: Duration::from_secs(6),
            final_window: Duration::from_secs(10),
            max_buffer: Duration::from_secs(30),
            phrase_max_chars: 60,
            phrase_pause: Duration::from_millis(1000),
            synthesis_workers: 2,
        }
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Engine names resolved through the core factories.
    pub vad_engine: String,
    pub stt_engine: String,
    pub llm_engine: String,
    pub tts_engine: String,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            vad_engine: "energy".to_string(),
            stt_engine: "null".to_string(),
            llm_engine: "echo".to_string(),
            tts_engine: "tone".to_string(),
            session: SessionConfig::default(),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env if present.
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        let session_defaults = SessionConfig::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = env::var("PORT")
            .unwrap_or_else(|_| defaults.port.to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let session = SessionConfig {
            sample_rate: env_u64("STREAM_SAMPLE_RATE", session_defaults.sample_rate.into()) as u32,
            window_ms: env_u64("STREAM_VAD_WINDOW_MS", session_defaults.window_ms.into()) as u32,
            silence_ms: env_u64("STREAM_VAD_SILENCE_MS", session_defaults.silence_ms),
            partial_interval_ms: env_u64(
                "STREAM_PARTIAL_INTERVAL_MS",
                session_defaults.partial_interval_ms,
            ),
            partial_window: Duration::from_secs_f64(env_f64(
                "STREAM_PARTIAL_WINDOW_S",
                session_defaults.partial_window.as_secs_f64(),
            )),
            final_window: Duration::from_secs_f64(env_f64(
                "STREAM_FINAL_WINDOW_S",
                session_defaults.final_window.as_secs_f64(),
            )),
            max_buffer: Duration::from_secs_f64(env_f64(
                "STREAM_MAX_BUFFER_S",
                session_defaults.max_buffer.as_secs_f64(),
            )),
            phrase_max_chars: env_u64(
                "STREAM_PHRASE_MAX_CHARS",
                session_defaults.phrase_max_chars as u64,
            ) as usize,
            phrase_pause: Duration::from_millis(env_u64(
                "STREAM_PHRASE_PAUSE_MS",
                session_defaults.phrase_pause.as_millis() as u64,
            )),
            synthesis_workers: env_u64(
                "STREAM_TTS_WORKERS",
                session_defaults.synthesis_workers as u64,
            )
            .max(1) as usize,
        };

        Ok(Self {
            host,
            port,
            vad_engine: env::var("STREAM_VAD_ENGINE").unwrap_or(defaults.vad_engine),
            stt_engine: env::var("STREAM_STT_ENGINE").unwrap_or(defaults.stt_engine),
            llm_engine: env::var("STREAM_LLM_ENGINE").unwrap_or(defaults.llm_engine),
            tts_engine: env::var("STREAM_TTS_ENGINE").unwrap_or(defaults.tts_engine),
            session,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
