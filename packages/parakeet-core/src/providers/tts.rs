//! Speech-synthesis adapter.
//!
//! The provider returns raw PCM at its own sample rate; the adapter
//! resamples to the device rate and encodes Opus frames. Resampling and
//! encoding are CPU-bound and run on the blocking pool so the cooperative
//! scheduler (and the keepalive ping task) never starves.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::ProviderSettings;
use crate::protocol_constants::TTS_PROVIDER_SAMPLE_RATE;
use crate::providers::{ClientPool, ProviderError, ProviderResult, Synthesizer};
use crate::session::UserConfig;
use crate::stream::codec::{encode_frames, pcm_bytes_to_samples, resample_linear};

/// Speech-synthesis service with per-user account routing.
pub struct TtsService {
    pool: Arc<ClientPool>,
    settings: ProviderSettings,
    sample_rate: u32,
    channels: u16,
}

impl TtsService {
    pub fn new(
        pool: Arc<ClientPool>,
        settings: ProviderSettings,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            pool,
            settings,
            sample_rate,
            channels,
        }
    }

    async fn fetch_pcm(&self, text: &str, user: Option<&UserConfig>) -> ProviderResult<Bytes> {
        let (model, voice) = match user {
            Some(u) => (
                UserConfig::pick(&u.tts_model, &self.settings.tts_model),
                UserConfig::pick(&u.tts_voice, &self.settings.tts_voice),
            ),
            None => (
                self.settings.tts_model.as_str(),
                self.settings.tts_voice.as_str(),
            ),
        };

        let client = self.pool.for_user(user);
        match client.speech_pcm(model, voice, text).await {
            Ok(pcm) => Ok(pcm),
            Err(e) if user.is_some_and(UserConfig::has_key) => {
                log::warn!("[TTS] Per-user synthesis failed ({}), retrying default", e);
                self.pool
                    .default_client()
                    .speech_pcm(&self.settings.tts_model, &self.settings.tts_voice, text)
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Synthesizer for TtsService {
    async fn synthesize(
        &self,
        text: &str,
        user: Option<&UserConfig>,
    ) -> ProviderResult<Vec<Bytes>> {
        let preview: String = text.chars().take(50).collect();
        log::info!("[TTS] Synthesizing '{}'", preview);

        let provider_pcm = self.fetch_pcm(text, user).await?;
        log::info!(
            "[TTS] Received {} bytes PCM ({} Hz)",
            provider_pcm.len(),
            TTS_PROVIDER_SAMPLE_RATE
        );

        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let frames = tokio::task::spawn_blocking(move || {
            let samples = pcm_bytes_to_samples(&provider_pcm);
            let resampled = resample_linear(&samples, TTS_PROVIDER_SAMPLE_RATE, sample_rate);
            encode_frames(&resampled, sample_rate, channels)
        })
        .await
        .map_err(|e| ProviderError::Task(e.to_string()))??;

        log::info!("[TTS] Encoded {} Opus frames", frames.len());
        Ok(frames)
    }
}
