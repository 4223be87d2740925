//! Speech-recognition adapter.
//!
//! Routes decoded microphone PCM to the configured backend: an
//! OpenAI-compatible transcription endpoint (WAV upload) or a FunASR
//! offline WebSocket service. Either way the transcript passes through
//! the hallucination filter before the pipeline sees it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::{AsrBackend, ProviderSettings};
use crate::protocol_constants::{
    ASR_SOCKET_TIMEOUT_SECS, FRAME_SAMPLES, MIN_ASR_DURATION_SECS, PROVIDER_TIMEOUT_SECS,
};
use crate::providers::{
    filter_transcript, ClientPool, ProviderError, ProviderResult, Transcriber,
};
use crate::session::UserConfig;
use crate::stream::codec::samples_to_pcm_bytes;
use crate::stream::pcm_to_wav;

/// Vocabulary hint sent with every transcription request. Kept short:
/// long prompts degrade recognition instead of helping it.
const ASR_PROMPT: &str = "语音助手。播放音乐，下一首，暂停，继续播放，停止播放，\
音量大一点，音量小一点，提醒我，设置闹钟，今天天气怎么样，\
搜索，帮我查一下，开始会议，结束会议，清空对话，你好，谢谢，再见。";

/// Transcription language hint.
const ASR_LANGUAGE: &str = "zh";

/// Near-silence threshold on the absolute sample peak; quieter signals
/// are left alone so noise is not amplified.
const SILENCE_PEAK: f64 = 100.0;

/// Peaks above this level (dBFS) are loud enough already.
const SKIP_NORMALIZE_DBFS: f64 = -6.0;

/// Target peak level for quiet signals (dBFS).
const TARGET_PEAK_DBFS: f64 = -3.0;

/// Peak-normalizes quiet microphone PCM to [`TARGET_PEAK_DBFS`].
///
/// Embedded microphones deliver very low levels (~0.5% of full scale);
/// recognition accuracy drops sharply without gain. Near-silent and
/// already-loud signals are returned unchanged.
pub fn normalize_peak(samples: &[i16]) -> Vec<i16> {
    let peak = samples
        .iter()
        .map(|&s| f64::from(s).abs())
        .fold(0.0f64, f64::max);
    if peak < SILENCE_PEAK {
        return samples.to_vec();
    }

    let peak_dbfs = 20.0 * (peak / 32768.0).log10();
    if peak_dbfs > SKIP_NORMALIZE_DBFS {
        log::info!("[ASR] Peak {:.1} dBFS, loud enough, skipping gain", peak_dbfs);
        return samples.to_vec();
    }

    let target = 32768.0 * 10f64.powf(TARGET_PEAK_DBFS / 20.0);
    let gain = target / peak;
    log::info!("[ASR] Peak {:.1} dBFS, applying gain {:.1}x", peak_dbfs, gain);
    samples
        .iter()
        .map(|&s| (f64::from(s) * gain).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// One JSON result frame from the FunASR socket.
#[derive(Deserialize)]
struct FunasrResult {
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    mode: String,
}

/// Speech-recognition service with backend routing and fallback.
pub struct AsrService {
    pool: Arc<ClientPool>,
    settings: ProviderSettings,
    sample_rate: u32,
    channels: u16,
}

impl AsrService {
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

    fn duration_secs(&self, pcm: &[i16]) -> f32 {
        pcm.len() as f32 / (self.sample_rate as f32 * f32::from(self.channels))
    }

    /// Uploads a WAV to the transcription endpoint. Tries the user's own
    /// account first; on failure with per-user config in effect, retries
    /// once against the global default.
    async fn transcribe_whisper(
        &self,
        pcm: &[i16],
        user: Option<&UserConfig>,
    ) -> ProviderResult<String> {
        let wav = pcm_to_wav(&samples_to_pcm_bytes(pcm), self.sample_rate, self.channels);
        let model = user
            .map(|u| UserConfig::pick(&u.asr_model, &self.settings.asr_model))
            .unwrap_or(&self.settings.asr_model)
            .to_string();

        let client = self.pool.for_user(user);
        match client
            .transcribe_wav(wav.clone(), &model, ASR_LANGUAGE, ASR_PROMPT)
            .await
        {
            Ok(text) => Ok(text),
            Err(e) if user.is_some_and(UserConfig::has_key) => {
                log::warn!("[ASR] Per-user transcription failed ({}), retrying default", e);
                self.pool
                    .default_client()
                    .transcribe_wav(wav, &self.settings.asr_model, ASR_LANGUAGE, ASR_PROMPT)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Runs one offline recognition over the FunASR WebSocket: config
    /// frame, 60 ms PCM chunks, end-of-speech marker, then JSON results
    /// until a final one arrives.
    async fn transcribe_funasr(&self, pcm: &[i16]) -> ProviderResult<String> {
        let url = self.settings.funasr_url.as_str();
        let (stream, _) = timeout(
            Duration::from_secs(ASR_SOCKET_TIMEOUT_SECS),
            connect_async(url),
        )
        .await
        .map_err(|_| ProviderError::Socket("connect timed out".into()))?
        .map_err(|e| ProviderError::Socket(e.to_string()))?;

        let (mut write, mut read) = stream.split();

        let config = serde_json::json!({
            "mode": "offline",
            "audio_fs": self.sample_rate,
            "wav_name": "parakeet",
            "wav_format": "pcm",
            "is_speaking": true,
            "hotwords": self.settings.asr_hotwords.join(" "),
            "itn": true,
        });
        write
            .send(WsMessage::Text(config.to_string().into()))
            .await
            .map_err(|e| ProviderError::Socket(e.to_string()))?;

        let chunk_samples = FRAME_SAMPLES * self.channels as usize;
        for chunk in pcm.chunks(chunk_samples) {
            write
                .send(WsMessage::Binary(samples_to_pcm_bytes(chunk).into()))
                .await
                .map_err(|e| ProviderError::Socket(e.to_string()))?;
        }
        write
            .send(WsMessage::Text(
                serde_json::json!({"is_speaking": false}).to_string().into(),
            ))
            .await
            .map_err(|e| ProviderError::Socket(e.to_string()))?;

        let collect = async {
            let mut text = String::new();
            while let Some(message) = read.next().await {
                let message = message.map_err(|e| ProviderError::Socket(e.to_string()))?;
                let WsMessage::Text(payload) = message else {
                    continue;
                };
                let result: FunasrResult = serde_json::from_str(payload.as_str())
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?;
                text.push_str(&result.text);
                if result.is_final || result.mode == "offline" {
                    break;
                }
            }
            Ok::<String, ProviderError>(text)
        };
        let text = timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS), collect)
            .await
            .map_err(|_| ProviderError::Socket("recognition timed out".into()))??;

        let _ = timeout(
            Duration::from_secs(ASR_SOCKET_TIMEOUT_SECS),
            write.send(WsMessage::Close(None)),
        )
        .await;

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Transcriber for AsrService {
    async fn transcribe(&self, pcm: &[i16], user: Option<&UserConfig>) -> ProviderResult<String> {
        let duration = self.duration_secs(pcm);
        if duration < MIN_ASR_DURATION_SECS {
            log::info!(
                "[ASR] Skipping short audio ({:.1}s < {:.1}s)",
                duration,
                MIN_ASR_DURATION_SECS
            );
            return Ok(String::new());
        }

        let pcm = normalize_peak(pcm);

        let text = match self.settings.asr_backend {
            AsrBackend::Funasr if !self.settings.funasr_url.is_empty() => {
                match self.transcribe_funasr(&pcm).await {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("[ASR] FunASR failed ({}), falling back to whisper", e);
                        self.transcribe_whisper(&pcm, user).await?
                    }
                }
            }
            _ => self.transcribe_whisper(&pcm, user).await?,
        };

        log::info!("[ASR] Result: '{}'", text);
        Ok(filter_transcript(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_silence_left_alone() {
        let samples = vec![0i16, 50, -50, 20];
        assert_eq!(normalize_peak(&samples), samples);
    }

    #[test]
    fn loud_signal_left_alone() {
        // Peak above -6 dBFS (~16422).
        let samples = vec![0i16, 20_000, -18_000];
        assert_eq!(normalize_peak(&samples), samples);
    }

    #[test]
    fn quiet_signal_gained_to_minus_three_dbfs() {
        // Peak 500 is far below -6 dBFS; expect gain to ~-3 dBFS.
        let samples = vec![0i16, 500, -250];
        let normalized = normalize_peak(&samples);
        let peak = normalized.iter().map(|&s| i32::from(s).abs()).max().unwrap();
        let target = (32768.0 * 10f64.powf(-3.0 / 20.0)) as i32;
        assert!((peak - target).abs() <= 1, "peak {peak} vs target {target}");
        // Relative shape preserved by linear gain.
        assert_eq!(normalized[0], 0);
        assert!((i32::from(normalized[1]) + 2 * i32::from(normalized[2])).abs() <= 2);
    }

    #[test]
    fn gain_stays_in_i16_range() {
        let samples = vec![400i16, -400, 300, -301];
        let normalized = normalize_peak(&samples);
        assert!(normalized
            .iter()
            .all(|&s| (-32768..=32767).contains(&i32::from(s))));
    }

    #[tokio::test]
    async fn short_audio_skips_provider() {
        // 0.3 s at 16 kHz mono; no server is configured, so reaching the
        // provider would error rather than return empty.
        let service = AsrService::new(
            Arc::new(ClientPool::new(
                crate::providers::create_http_client(),
                ProviderSettings::default(),
            )),
            ProviderSettings::default(),
            16_000,
            1,
        );
        let pcm = vec![0i16; 4800];
        let text = service.transcribe(&pcm, None).await.unwrap();
        assert_eq!(text, "");
    }
}
