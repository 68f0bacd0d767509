//! Platform session readiness.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::platform::ChatPlatform;

/// Readiness flag shared between the session task, the worker and the
/// health endpoint. Once raised it stays raised.
#[derive(Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the session reports ready.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Log in to the platform, retrying until it succeeds, then raise `ready`.
pub async fn establish_session(
    platform: Arc<dyn ChatPlatform>,
    ready: ReadySignal,
    retry_delay: Duration,
) {
    let mut attempt = 1u32;
    loop {
        match platform.login().await {
            Ok(bot_user_id) => {
                tracing::info!(bot_user_id, attempt, "Platform session ready");
                ready.mark_ready();
                return;
            }
            Err(e) => {
                tracing::error!(
                    attempt,
                    error = %e,
                    retry_in_secs = retry_delay.as_secs(),
                    "Platform login failed"
                );
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
