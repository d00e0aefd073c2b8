use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::startup::AppState;

/// Liveness check. Reports, without revealing it, whether the API key is set.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "llm-generate",
        "version": env!("CARGO_PKG_VERSION"),
        "api_key_configured": state.api_key.is_some(),
    }))
}
