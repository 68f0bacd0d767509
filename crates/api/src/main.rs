//! Whitenight server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use whitenight_common::config::{AppConfig, IngressMode};
use whitenight_notifier::discord::DiscordClient;
use whitenight_notifier::platform::ChatPlatform;
use whitenight_notifier::queue::EventQueue;
use whitenight_notifier::session::{ReadySignal, establish_session};
use whitenight_notifier::worker::{DeliverySettings, DeliveryWorker};

use whitenight_api::routes::create_router;
use whitenight_api::sink::{Forwarder, IngressSink};
use whitenight_api::state::AppState;

/// Webhook bodies are tiny; reject anything larger.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("whitenight_api=info,whitenight_notifier=info,tower_http=info")
        }))
        .json()
        .init();

    tracing::info!("Starting Whitenight...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let ready = ReadySignal::new();

    let sink = match config.ingress_mode {
        IngressMode::Queue => {
            let bot = config
                .bot
                .clone()
                .ok_or_else(|| anyhow::anyhow!("bot settings are required in queue mode"))?;

            let queue = EventQueue::with_capacity(config.queue_capacity);
            let platform: Arc<dyn ChatPlatform> = Arc::new(DiscordClient::new(
                bot.api_base.as_str(),
                bot.token.as_str(),
                config.outbound_timeout(),
            )?);

            // Login runs in the background so the HTTP server accepts
            // webhooks while the session comes up.
            tokio::spawn(establish_session(
                platform.clone(),
                ready.clone(),
                Duration::from_secs(bot.login_retry_secs),
            ));

            let settings = DeliverySettings {
                guild_id: bot.server_id,
                channel_id: bot.channel_id,
                role_id: bot.role_id,
                step_timeout: config.outbound_timeout(),
            };
            DeliveryWorker::new(queue.clone(), platform, settings).spawn(ready.clone());
            tracing::info!(
                guild_id = bot.server_id,
                channel_id = bot.channel_id,
                role_id = ?bot.role_id,
                queue_capacity = ?config.queue_capacity,
                "Delivery worker scheduled"
            );

            IngressSink::Local(queue)
        }
        IngressMode::Forward => {
            let url = config
                .forward_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("BOT_QUEUE_URL is required in forward mode"))?;
            let forwarder = Forwarder::new(url, config.outbound_timeout())?;
            tracing::info!(url = forwarder.url(), "Forwarding webhooks downstream");
            IngressSink::Forward(forwarder)
        }
    };

    // Build application state
    let state = AppState::new(config.ingress_mode, sink, ready);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(mode = %config.ingress_mode, "Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    tracing::info!("Whitenight stopped.");
    Ok(())
}
