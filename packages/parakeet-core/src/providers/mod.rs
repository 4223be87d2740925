//! Thin façades over the external ASR, LLM, and TTS services.
//!
//! Each adapter resolves the per-user provider override first and falls
//! back to the global default once on failure. The gateway never talks to
//! a provider except through the traits defined here, which keeps the
//! pipeline testable without network access.

pub mod asr;
pub mod hallucination;
pub mod llm;
pub mod tts;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProviderSettings;
use crate::protocol_constants::{CLIENT_POOL_CAPACITY, PROVIDER_TIMEOUT_SECS};
use crate::sender::OutboundSink;
use crate::session::{Session, UserConfig};

pub use asr::AsrService;
pub use hallucination::{filter_transcript, is_hallucination};
pub use llm::LlmService;
pub use tts::TtsService;

/// Errors surfaced by provider adapters after fallback handling.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {0}: {1}")]
    Status(u16, String),

    #[error("Streaming socket failed: {0}")]
    Socket(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("Audio codec failed: {0}")]
    Codec(#[from] crate::stream::CodecError),
}

/// Convenient Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

// ─────────────────────────────────────────────────────────────────────────────
// Provider Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Speech recognition: 16 kHz mono PCM in, transcript out.
///
/// Returns the empty string for audio that should be silently ignored
/// (too short, silence, or a filtered hallucination).
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, pcm: &[i16], user: Option<&UserConfig>) -> ProviderResult<String>;
}

/// Speech synthesis: text in, device-rate Opus frames out.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, user: Option<&UserConfig>)
        -> ProviderResult<Vec<Bytes>>;
}

/// Conversational reply generation, including intent dispatch.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(
        &self,
        text: &str,
        session: &Arc<Session>,
        sink: &Arc<dyn OutboundSink>,
    ) -> ProviderResult<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible HTTP Client
// ─────────────────────────────────────────────────────────────────────────────

/// One chat turn sent to the chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// HTTP client bound to one (base URL, API key) provider account.
///
/// The underlying `reqwest::Client` is shared across all accounts for
/// connection pooling; this struct only carries the routing.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status(
            status.as_u16(),
            body.chars().take(200).collect(),
        ))
    }

    /// Chat completion. `json_mode` requests a JSON-object response.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> ProviderResult<String> {
        let request = ChatRequest {
            model,
            messages,
            response_format: json_mode.then(|| serde_json::json!({"type": "json_object"})),
        };
        let response = self
            .http
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let completion: ChatCompletion = Self::check(response).await?.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ProviderError::Malformed("chat completion without content".into()))
    }

    /// Audio transcription from an in-memory WAV upload.
    pub async fn transcribe_wav(
        &self,
        wav: Bytes,
        model: &str,
        language: &str,
        prompt: &str,
    ) -> ProviderResult<String> {
        let part = reqwest::multipart::Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(ProviderError::Http)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model.to_string())
            .text("language", language.to_string())
            .text("prompt", prompt.to_string())
            .text("temperature", "0");

        let response = self
            .http
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let transcription: Transcription = Self::check(response).await?.json().await?;
        Ok(transcription.text.trim().to_string())
    }

    /// Speech synthesis returning raw provider-rate PCM.
    pub async fn speech_pcm(&self, model: &str, voice: &str, text: &str) -> ProviderResult<Bytes> {
        let request = SpeechRequest {
            model,
            voice,
            input: text,
            response_format: "pcm",
        };
        let response = self
            .http
            .post(self.url("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-user Client Pool
// ─────────────────────────────────────────────────────────────────────────────

/// LRU pool of per-user provider clients keyed by (base URL, API key).
///
/// Users bringing their own credentials get a dedicated routing client;
/// the pool caps at [`CLIENT_POOL_CAPACITY`] entries, evicting the least
/// recently used on overflow.
pub struct ClientPool {
    http: reqwest::Client,
    default: Arc<OpenAiClient>,
    settings: ProviderSettings,
    cache: Mutex<LruCache<(String, String), Arc<OpenAiClient>>>,
}

impl ClientPool {
    pub fn new(http: reqwest::Client, settings: ProviderSettings) -> Self {
        let default = Arc::new(OpenAiClient::new(
            http.clone(),
            settings.base_url.clone(),
            settings.api_key.clone(),
        ));
        let capacity = NonZeroUsize::new(CLIENT_POOL_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            http,
            default,
            settings,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The client bound to the global default account.
    pub fn default_client(&self) -> Arc<OpenAiClient> {
        Arc::clone(&self.default)
    }

    /// Resolves the client for a session: the user's own account when an
    /// API key is configured, the global default otherwise.
    pub fn for_user(&self, user: Option<&UserConfig>) -> Arc<OpenAiClient> {
        let Some(user) = user.filter(|u| u.has_key()) else {
            return self.default_client();
        };

        let base_url = UserConfig::pick(&user.base_url, &self.settings.base_url).to_string();
        let key = (base_url.clone(), user.api_key.clone());

        let mut cache = self.cache.lock();
        if let Some(client) = cache.get(&key) {
            return Arc::clone(client);
        }
        let client = Arc::new(OpenAiClient::new(
            self.http.clone(),
            base_url,
            user.api_key.clone(),
        ));
        cache.put(key, Arc::clone(&client));
        client
    }

    /// Number of cached per-user clients (excluding the default).
    pub fn cached_clients(&self) -> usize {
        self.cache.lock().len()
    }
}

/// Builds the shared pooled HTTP client used by every adapter.
pub fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}
