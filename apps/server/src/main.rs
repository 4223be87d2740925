//! Parakeet Server - standalone headless voice-assistant gateway.
//!
//! Accepts device WebSocket connections, runs the ASR → LLM → TTS
//! pipeline per utterance, and delivers scheduled reminders. All knobs
//! come from flags or environment variables; no config file is required.

use anyhow::{Context, Result};
use clap::Parser;
use parakeet_core::{bootstrap, start_server, AsrBackend, GatewayConfig, ProviderSettings};
use tokio::signal;

/// Parakeet Server - voice-assistant gateway for embedded devices.
#[derive(Parser, Debug)]
#[command(name = "parakeet-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind the WebSocket/HTTP server to.
    #[arg(long, default_value = "0.0.0.0", env = "PARAKEET_BIND_HOST")]
    host: String,

    /// Port to bind the WebSocket/HTTP server to.
    #[arg(short = 'p', long, default_value_t = 8770, env = "PARAKEET_BIND_PORT")]
    port: u16,

    /// Opus frame duration on the wire (ms).
    #[arg(long, default_value_t = 60, env = "PARAKEET_FRAME_DURATION_MS")]
    frame_duration_ms: u32,

    /// PCM sample rate negotiated with devices (Hz).
    #[arg(long, default_value_t = 16_000, env = "PARAKEET_PCM_SAMPLE_RATE")]
    pcm_sample_rate: u32,

    /// PCM channel count negotiated with devices.
    #[arg(long, default_value_t = 1, env = "PARAKEET_PCM_CHANNELS")]
    pcm_channels: u16,

    /// SQLite database URL for the reminder store.
    #[arg(long, default_value = "sqlite://parakeet.db", env = "PARAKEET_DATABASE_URL")]
    database_url: String,

    /// Secret for access-token signing and API-key encryption.
    #[arg(
        long,
        default_value = "change-me-in-production-please",
        env = "PARAKEET_SECRET_KEY",
        hide_env_values = true
    )]
    secret_key: String,

    /// Base URL of the OpenAI-compatible provider API.
    #[arg(
        long,
        default_value = "https://api.openai.com/v1",
        env = "PARAKEET_OPENAI_BASE_URL"
    )]
    openai_base_url: String,

    /// API key for the default provider account.
    #[arg(long, default_value = "", env = "PARAKEET_OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// Chat/intent model identifier.
    #[arg(long, default_value = "gpt-4o-mini", env = "PARAKEET_CHAT_MODEL")]
    chat_model: String,

    /// Transcription model identifier.
    #[arg(long, default_value = "whisper-1", env = "PARAKEET_ASR_MODEL")]
    asr_model: String,

    /// ASR backend tried first: "whisper" or "funasr".
    #[arg(long, default_value = "whisper", env = "PARAKEET_ASR_BACKEND")]
    asr_backend: String,

    /// FunASR WebSocket endpoint (required for the funasr backend).
    #[arg(long, default_value = "", env = "PARAKEET_FUNASR_URL")]
    funasr_url: String,

    /// Speech-synthesis model identifier.
    #[arg(long, default_value = "tts-1", env = "PARAKEET_TTS_MODEL")]
    tts_model: String,

    /// Speech-synthesis voice.
    #[arg(long, default_value = "alloy", env = "PARAKEET_TTS_VOICE")]
    tts_voice: String,

    /// Remote task-execution endpoint; empty disables the intent stage.
    #[arg(long, default_value = "", env = "PARAKEET_EXEC_BASE_URL")]
    exec_base_url: String,

    /// API key for the execution endpoint.
    #[arg(long, default_value = "", env = "PARAKEET_EXEC_API_KEY", hide_env_values = true)]
    exec_api_key: String,

    /// Registered devices as `device_id:token` pairs.
    #[arg(long = "device", env = "PARAKEET_DEVICES", value_delimiter = ',')]
    devices: Vec<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PARAKEET_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

impl Args {
    fn to_core_config(&self) -> Result<GatewayConfig> {
        let asr_backend = match self.asr_backend.as_str() {
            "whisper" => AsrBackend::Whisper,
            "funasr" => AsrBackend::Funasr,
            other => anyhow::bail!("unknown ASR backend '{other}' (expected whisper or funasr)"),
        };

        Ok(GatewayConfig {
            bind_host: self.host.clone(),
            bind_port: self.port,
            pcm_sample_rate: self.pcm_sample_rate,
            pcm_channels: self.pcm_channels,
            frame_duration_ms: self.frame_duration_ms,
            database_url: self.database_url.clone(),
            secret_key: self.secret_key.clone(),
            providers: ProviderSettings {
                base_url: self.openai_base_url.clone(),
                api_key: self.openai_api_key.clone(),
                chat_model: self.chat_model.clone(),
                asr_model: self.asr_model.clone(),
                asr_backend,
                funasr_url: self.funasr_url.clone(),
                asr_hotwords: Vec::new(),
                tts_model: self.tts_model.clone(),
                tts_voice: self.tts_voice.clone(),
                exec_base_url: self.exec_base_url.clone(),
                exec_api_key: self.exec_api_key.clone(),
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Parakeet Server v{}", env!("CARGO_PKG_VERSION"));

    let config = args.to_core_config().context("Invalid configuration")?;
    log::info!(
        "Configuration: bind={}:{}, frame={}ms, pcm={}Hz/{}ch",
        config.bind_host,
        config.bind_port,
        config.frame_duration_ms,
        config.pcm_sample_rate,
        config.pcm_channels
    );

    let gateway = bootstrap(config)
        .await
        .context("Failed to bootstrap services")?;

    // Seed registered devices from flags/env.
    for pair in &args.devices {
        let Some((device_id, token)) = pair.split_once(':') else {
            anyhow::bail!("invalid --device value '{pair}' (expected device_id:token)");
        };
        gateway.devices.register(device_id, token);
    }
    log::info!("Registered {} device(s)", gateway.devices.len());

    gateway.start_background_tasks();

    let app_state = gateway.app_state();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");
    gateway.shutdown();
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
