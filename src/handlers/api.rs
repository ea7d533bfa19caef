use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};

use crate::state::AppState;

/// Health check handler
/// Returns a simple JSON response indicating the server is running
pub async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "OK"
    })))
}

/// Runtime status: uptime and session occupancy
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = if state.is_draining() { "draining" } else { "OK" };
    Json(json!({
        "status": status,
        "uptime_seconds": state.uptime().as_secs(),
        "active_sessions": state.admission.active(),
        "max_sessions": state.admission.capacity(),
    }))
}
