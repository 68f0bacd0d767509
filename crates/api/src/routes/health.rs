//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let last_payload = state.last_payload.read().await.clone();
    Json(json!({
        "ok": true,
        "bot_ready": state.ready.is_ready(),
        "queue_size": state.sink.queue_size().await,
        "mode": state.mode.to_string(),
        "last_payload": last_payload,
        "version": env!("CARGO_PKG_VERSION")
    }))
}
