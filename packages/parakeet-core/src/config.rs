//! Core gateway configuration.
//!
//! All fields have defaults suitable for local development; the server
//! binary overrides them from flags and environment variables.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{FRAME_DURATION_MS, PCM_CHANNELS, PCM_SAMPLE_RATE};

/// Configuration for the Parakeet gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host the WebSocket/HTTP server binds to.
    pub bind_host: String,

    /// Port the WebSocket/HTTP server binds to.
    pub bind_port: u16,

    /// PCM sample rate negotiated with devices (Hz).
    pub pcm_sample_rate: u32,

    /// PCM channel count negotiated with devices.
    pub pcm_channels: u16,

    /// Opus frame duration on the wire (ms).
    pub frame_duration_ms: u32,

    /// SQLite database URL for the reminder store.
    pub database_url: String,

    /// Secret used for JWT signing and API-key encryption at rest.
    pub secret_key: String,

    /// Provider endpoints and model identifiers.
    pub providers: ProviderSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8770,
            pcm_sample_rate: PCM_SAMPLE_RATE,
            pcm_channels: PCM_CHANNELS,
            frame_duration_ms: FRAME_DURATION_MS,
            database_url: "sqlite://parakeet.db".to_string(),
            secret_key: "change-me-in-production-please".to_string(),
            providers: ProviderSettings::default(),
        }
    }
}

/// Which speech-recognition backend handles a request first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrBackend {
    /// OpenAI-compatible transcription endpoint (WAV upload).
    Whisper,
    /// FunASR offline WebSocket service.
    Funasr,
}

/// Global provider endpoints, keys, and model identifiers.
///
/// Per-user overrides (see [`crate::providers::UserConfig`]) shadow these
/// at each provider call and fall back here on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Base URL of the OpenAI-compatible API (chat, transcription, speech).
    pub base_url: String,

    /// API key for the default provider account.
    pub api_key: String,

    /// Chat/intent model identifier.
    pub chat_model: String,

    /// Transcription model identifier.
    pub asr_model: String,

    /// Which ASR backend to try first.
    pub asr_backend: AsrBackend,

    /// FunASR WebSocket endpoint (used when `asr_backend` is `funasr`).
    pub funasr_url: String,

    /// Hotword hints sent to the streaming recognizer.
    pub asr_hotwords: Vec<String>,

    /// Speech-synthesis model identifier.
    pub tts_model: String,

    /// Speech-synthesis voice.
    pub tts_voice: String,

    /// Remote task-execution endpoint; empty disables the intent stage
    /// and the responder degrades to plain chat.
    pub exec_base_url: String,

    /// API key for the execution endpoint.
    pub exec_api_key: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            chat_model: "gpt-4o-mini".to_string(),
            asr_model: "whisper-1".to_string(),
            asr_backend: AsrBackend::Whisper,
            funasr_url: String::new(),
            asr_hotwords: Vec::new(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            exec_base_url: String::new(),
            exec_api_key: String::new(),
        }
    }
}

impl ProviderSettings {
    /// Whether the remote execution stage is available.
    pub fn exec_configured(&self) -> bool {
        !self.exec_base_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_format() {
        let config = GatewayConfig::default();
        assert_eq!(config.pcm_sample_rate, 16_000);
        assert_eq!(config.pcm_channels, 1);
        assert_eq!(config.frame_duration_ms, 60);
    }

    #[test]
    fn exec_stage_disabled_by_default() {
        assert!(!ProviderSettings::default().exec_configured());
    }
}
