//! Ingress sinks: where an accepted payload goes.
//!
//! `Local` hands the event to the in-process delivery worker through the
//! event queue. `Forward` relays the raw body to a downstream ingestion
//! endpoint and reports whatever it answered; nothing is retried.

use std::time::Duration;

use serde_json::Value;

use whitenight_common::error::AppError;
use whitenight_common::types::NotificationEvent;
use whitenight_notifier::queue::{EventQueue, QueueError};

/// Longest downstream body echoed back to the caller.
pub const MAX_ECHO_BODY: usize = 512;

#[derive(Clone)]
pub enum IngressSink {
    Local(EventQueue),
    Forward(Forwarder),
}

/// What the sink did with an accepted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    Queued { queue_size: usize },
    Forwarded { status: u16, body: String },
}

impl IngressSink {
    /// Hand off a validated payload. `payload` is the raw body, `event` its
    /// normalized form.
    pub async fn accept(
        &self,
        payload: &Value,
        event: NotificationEvent,
    ) -> Result<Accepted, AppError> {
        match self {
            IngressSink::Local(queue) => {
                let event_id = event.id;
                let subject_id = event.subject_id;
                let queue_size = queue.enqueue(event).await.map_err(|e| match e {
                    QueueError::Full(capacity) => AppError::QueueFull(capacity),
                })?;
                tracing::info!(%event_id, subject_id, queue_size, "Event queued");
                Ok(Accepted::Queued { queue_size })
            }
            IngressSink::Forward(forwarder) => forwarder.forward(payload).await,
        }
    }

    /// Pending events; always zero for the forwarding sink.
    pub async fn queue_size(&self) -> usize {
        match self {
            IngressSink::Local(queue) => queue.len().await,
            IngressSink::Forward(_) => 0,
        }
    }
}

/// Relays payloads verbatim to a downstream URL.
#[derive(Clone)]
pub struct Forwarder {
    http: reqwest::Client,
    url: String,
}

impl Forwarder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the payload downstream. Transport failures are errors; any HTTP
    /// answer, including non-2xx, is returned as `Accepted::Forwarded`.
    pub async fn forward(&self, payload: &Value) -> Result<Accepted, AppError> {
        let response = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %self.url, error = %e, "Forward request failed");
                AppError::Forward(format!("Forward to downstream failed: {}", e))
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::info!(url = %self.url, status, "Payload forwarded");

        Ok(Accepted::Forwarded {
            status,
            body: truncate(&body, MAX_ECHO_BODY),
        })
    }
}

/// Truncate to at most `max` characters.
fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
