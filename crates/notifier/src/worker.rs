//! Delivery worker.
//!
//! Single consumer of the [`EventQueue`]. For each event, in order:
//! 1. Direct message to the subject
//! 2. Announcement in the broadcast channel
//! 3. Role grant via [`GrantResolver`] when the result is a success
//!
//! Each step fails independently. The message steps are bounded by a
//! timeout. The grant step is not: it spans several platform requests, each
//! bounded on its own, and cutting it short could report a grant that
//! actually landed as failed. An event is consumed once all steps were
//! attempted; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use whitenight_common::types::NotificationEvent;

use crate::classify;
use crate::grant::{GrantOutcome, GrantResolver};
use crate::platform::{ChatPlatform, PlatformError};
use crate::queue::EventQueue;
use crate::session::ReadySignal;

/// Where and how the worker delivers.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub guild_id: u64,
    pub channel_id: u64,
    /// `None` disables the grant step
    pub role_id: Option<u64>,
    /// Upper bound for each message step
    pub step_timeout: Duration,
}

/// Result of a single delivery step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Delivered,
    Failed(String),
    TimedOut,
}

impl StepOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, StepOutcome::Delivered)
    }
}

/// Per-event summary of what each step did.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub event_id: Uuid,
    pub subject_id: u64,
    pub direct_message: StepOutcome,
    pub announcement: StepOutcome,
    /// `None` when the result was not a success
    pub grant: Option<GrantOutcome>,
}

/// Direct message text sent to the subject.
pub fn direct_message_text(result: &str) -> String {
    format!("Teszt eredményed: {}", result)
}

/// Broadcast channel text mentioning the subject.
pub fn announcement_text(event: &NotificationEvent) -> String {
    format!("{} Teszt eredmény: {}", event.mention(), event.result)
}

pub struct DeliveryWorker {
    queue: EventQueue,
    platform: Arc<dyn ChatPlatform>,
    resolver: GrantResolver,
    channel_id: u64,
    step_timeout: Duration,
}

impl DeliveryWorker {
    pub fn new(
        queue: EventQueue,
        platform: Arc<dyn ChatPlatform>,
        settings: DeliverySettings,
    ) -> Self {
        let resolver = GrantResolver::new(platform.clone(), settings.guild_id, settings.role_id);
        Self {
            queue,
            platform,
            resolver,
            channel_id: settings.channel_id,
            step_timeout: settings.step_timeout,
        }
    }

    /// Spawn the worker as a background task that starts consuming once
    /// `ready` is raised and runs for the life of the process.
    pub fn spawn(self, ready: ReadySignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            ready.wait().await;
            self.run().await;
        })
    }

    /// Consume events forever.
    pub async fn run(&self) {
        tracing::info!(channel_id = self.channel_id, "Queue worker started");
        loop {
            self.process_next().await;
        }
    }

    /// Wait for the next event and deliver it.
    pub async fn process_next(&self) -> DeliveryReport {
        let event = self.queue.dequeue().await;
        self.process_event(&event).await
    }

    /// Run every delivery step for one event. Never fails: each step's
    /// outcome is logged and recorded in the report.
    pub async fn process_event(&self, event: &NotificationEvent) -> DeliveryReport {
        tracing::info!(
            event_id = %event.id,
            subject_id = event.subject_id,
            result = %event.result,
            "Processing queue item"
        );

        let direct_message = self
            .step(
                self.platform
                    .send_direct_message(event.subject_id, &direct_message_text(&event.result)),
            )
            .await;
        log_step(event, "direct_message", &direct_message);

        let announcement = self
            .step(
                self.platform
                    .send_channel_message(self.channel_id, &announcement_text(event)),
            )
            .await;
        log_step(event, "announcement", &announcement);

        let grant = if classify::is_success(&event.result) {
            let outcome = self.resolver.resolve(event.subject_id).await;
            tracing::info!(
                event_id = %event.id,
                subject_id = event.subject_id,
                outcome = %outcome,
                "Role grant resolved"
            );
            Some(outcome)
        } else {
            tracing::info!(
                event_id = %event.id,
                subject_id = event.subject_id,
                "Not successful, no role"
            );
            None
        };

        DeliveryReport {
            event_id: event.id,
            subject_id: event.subject_id,
            direct_message,
            announcement,
            grant,
        }
    }

    async fn step<F>(&self, call: F) -> StepOutcome
    where
        F: Future<Output = Result<(), PlatformError>>,
    {
        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(Ok(())) => StepOutcome::Delivered,
            Ok(Err(e)) => StepOutcome::Failed(e.to_string()),
            Err(_) => StepOutcome::TimedOut,
        }
    }
}

fn log_step(event: &NotificationEvent, step: &'static str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Delivered => {
            tracing::debug!(event_id = %event.id, subject_id = event.subject_id, step, "Delivered");
        }
        StepOutcome::Failed(error) => {
            tracing::warn!(
                event_id = %event.id,
                subject_id = event.subject_id,
                step,
                error = %error,
                "Delivery step failed"
            );
        }
        StepOutcome::TimedOut => {
            tracing::warn!(
                event_id = %event.id,
                subject_id = event.subject_id,
                step,
                "Delivery step timed out"
            );
        }
    }
}
