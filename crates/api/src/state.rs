//! Shared application state for the Axum server.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use whitenight_common::config::IngressMode;
use whitenight_notifier::session::ReadySignal;

use crate::sink::IngressSink;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub mode: IngressMode,
    pub sink: IngressSink,
    pub ready: ReadySignal,
    /// Raw body of the most recently accepted request, for diagnostics
    pub last_payload: Arc<RwLock<Option<Value>>>,
}

impl AppState {
    pub fn new(mode: IngressMode, sink: IngressSink, ready: ReadySignal) -> Self {
        Self {
            mode,
            sink,
            ready,
            last_payload: Arc::new(RwLock::new(None)),
        }
    }
}
