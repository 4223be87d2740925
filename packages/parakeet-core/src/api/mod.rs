//! HTTP/WebSocket surface of the gateway.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::history::ConversationHistory;
use crate::pipeline::Pipeline;
use crate::preferences::PreferenceStore;
use crate::registry::{ConnectionRegistry, DeviceRegistry};

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub pipeline: Arc<Pipeline>,
    pub devices: Arc<DeviceRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub history: Arc<ConversationHistory>,
    pub preferences: Arc<PreferenceStore>,
}

/// Builds the router with the WebSocket endpoint and the health probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds the configured address and serves until the process exits.
pub async fn start_server(state: AppState) -> GatewayResult<()> {
    let addr = format!("{}:{}", state.config.bind_host, state.config.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Configuration(format!("failed to bind {addr}: {e}")))?;

    log::info!("[API] Listening on ws://{}/ws", addr);
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))
}
