//! Webhook ingress routes.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use whitenight_common::error::AppError;
use whitenight_common::types::NotificationEvent;

use crate::sink::Accepted;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue", post(ingest))
        .route("/webhook", post(ingest))
}

/// Response for a locally queued event.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub status: &'static str,
    pub queue_size: usize,
}

/// Response for a relayed payload.
#[derive(Debug, Serialize)]
pub struct ForwardResponse {
    pub status: &'static str,
    pub forward_status: u16,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /queue, POST /webhook — Validate a test result payload and hand it to
/// the configured sink. Delivery happens out of band.
///
/// The body is parsed as JSON whatever `Content-Type` the sender declared.
async fn ingest(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))?;

    let event = NotificationEvent::from_payload(&payload)?;
    let accepted = state.sink.accept(&payload, event).await?;
    *state.last_payload.write().await = Some(payload);

    let response = match accepted {
        Accepted::Queued { queue_size } => Json(QueuedResponse {
            status: "queued",
            queue_size,
        })
        .into_response(),
        Accepted::Forwarded { status, body } if (200..300).contains(&status) => {
            Json(ForwardResponse {
                status: "ok",
                forward_status: status,
                body,
                message: None,
            })
            .into_response()
        }
        Accepted::Forwarded { status, body } => {
            tracing::warn!(forward_status = status, "Downstream rejected forwarded payload");
            (
                StatusCode::BAD_GATEWAY,
                Json(ForwardResponse {
                    status: "error",
                    forward_status: status,
                    body,
                    message: Some(format!("Downstream returned {}", status)),
                }),
            )
                .into_response()
        }
    };

    Ok(response)
}
