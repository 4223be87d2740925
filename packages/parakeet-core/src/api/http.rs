//! Plain HTTP endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::protocol_constants::SERVICE_ID;

/// Health probe. Deployment checks expect the exact service id.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": SERVICE_ID,
        "connections": state.connections.len(),
    }))
}
