//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where every service is
//! instantiated and wired together, in dependency order. Process-wide
//! state (registries, history, preferences) is owned here and handed to
//! the components that need it; nothing reaches into globals.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::auth::{SecretCipher, TokenSigner};
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::history::ConversationHistory;
use crate::pipeline::Pipeline;
use crate::preferences::PreferenceStore;
use crate::providers::{
    create_http_client, AsrService, ClientPool, LlmService, Synthesizer, TtsService,
};
use crate::registry::{ConnectionRegistry, DeviceRegistry};
use crate::scheduler::ReminderScheduler;
use crate::store::{setup_database, ReminderStore};
use crate::tools::ToolRegistry;

/// Container for all bootstrapped services.
pub struct Gateway {
    pub config: GatewayConfig,
    pub devices: Arc<DeviceRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub history: Arc<ConversationHistory>,
    pub preferences: Arc<PreferenceStore>,
    pub reminders: Arc<ReminderStore>,
    pub pipeline: Arc<Pipeline>,
    pub token_signer: TokenSigner,
    pub secret_cipher: SecretCipher,
    tts: Arc<dyn Synthesizer>,
    cancel: CancellationToken,
}

/// Wires all services in dependency order: storage, shared HTTP client
/// and provider pool, provider adapters, then the pipeline.
pub async fn bootstrap(config: GatewayConfig) -> GatewayResult<Gateway> {
    let db = setup_database(&config.database_url).await?;
    let reminders = Arc::new(ReminderStore::new(db));

    let http = create_http_client();
    let pool = Arc::new(ClientPool::new(http.clone(), config.providers.clone()));

    let devices = Arc::new(DeviceRegistry::new());
    let connections = Arc::new(ConnectionRegistry::new());
    let history = Arc::new(ConversationHistory::new());
    let preferences = Arc::new(PreferenceStore::new());
    let tools = Arc::new(ToolRegistry::with_builtins());

    let asr = Arc::new(AsrService::new(
        Arc::clone(&pool),
        config.providers.clone(),
        config.pcm_sample_rate,
        config.pcm_channels,
    ));
    let tts: Arc<dyn Synthesizer> = Arc::new(TtsService::new(
        Arc::clone(&pool),
        config.providers.clone(),
        config.pcm_sample_rate,
        config.pcm_channels,
    ));
    let llm = Arc::new(LlmService::new(
        http,
        pool,
        config.providers.clone(),
        Arc::clone(&history),
        Arc::clone(&preferences),
        Arc::clone(&reminders),
        tools,
    ));

    let pipeline = Arc::new(Pipeline::new(
        asr,
        Arc::clone(&tts),
        llm,
        config.pcm_sample_rate,
        config.pcm_channels,
        config.frame_duration_ms,
    ));

    let token_signer = TokenSigner::new(&config.secret_key);
    let secret_cipher = SecretCipher::new(&config.secret_key);

    Ok(Gateway {
        config,
        devices,
        connections,
        history,
        preferences,
        reminders,
        pipeline,
        token_signer,
        secret_cipher,
        tts,
        cancel: CancellationToken::new(),
    })
}

impl Gateway {
    /// Builds the shared state for the HTTP/WebSocket server.
    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            pipeline: Arc::clone(&self.pipeline),
            devices: Arc::clone(&self.devices),
            connections: Arc::clone(&self.connections),
            history: Arc::clone(&self.history),
            preferences: Arc::clone(&self.preferences),
        }
    }

    /// Starts the long-lived background tasks (the reminder scheduler).
    pub fn start_background_tasks(&self) {
        let scheduler = ReminderScheduler::new(
            Arc::clone(&self.reminders),
            Arc::clone(&self.connections),
            Arc::clone(&self.tts),
            self.config.frame_duration_ms,
            self.cancel.child_token(),
        );
        tokio::spawn(scheduler.run());
        log::info!("[Bootstrap] Background tasks started");
    }

    /// Initiates graceful shutdown of background tasks.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel.cancel();
    }
}
