//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! Forwarding tests bind a throwaway downstream server on localhost.
//!
//! ```bash
//! cargo test -p whitenight-api --test integration
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower::ServiceExt;

use whitenight_api::routes::create_router;
use whitenight_api::sink::{Forwarder, IngressSink};
use whitenight_api::state::AppState;
use whitenight_common::config::IngressMode;
use whitenight_notifier::grant::GrantOutcome;
use whitenight_notifier::mock::MockPlatform;
use whitenight_notifier::queue::EventQueue;
use whitenight_notifier::session::ReadySignal;
use whitenight_notifier::worker::{DeliverySettings, DeliveryWorker, StepOutcome};

// ============================================================
// Helpers
// ============================================================

fn local_state(queue: EventQueue) -> AppState {
    AppState::new(IngressMode::Queue, IngressSink::Local(queue), ReadySignal::new())
}

async fn send(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(&body.to_string())).await
}

/// POST a raw body with an arbitrary (or no) content type.
async fn post_raw(app: Router, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut request = Request::builder().method("POST").uri("/queue");
    if let Some(content_type) = content_type {
        request = request.header("content-type", content_type);
    }
    let request = request.body(Body::from(body.to_string())).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Serve a downstream ingestion endpoint answering with `status`, recording
/// every body it receives.
async fn spawn_downstream(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route(
        "/queue",
        post({
            let received = received.clone();
            move |Json(body): Json<Value>| async move {
                received.lock().unwrap().push(body);
                (status, Json(json!({"status": "queued", "queue_size": 1})))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/queue", addr), received)
}

fn forward_state(url: String) -> AppState {
    forward_state_with_timeout(url, Duration::from_secs(5))
}

fn forward_state_with_timeout(url: String, timeout: Duration) -> AppState {
    let forwarder = Forwarder::new(url, timeout).unwrap();
    AppState::new(
        IngressMode::Forward,
        IngressSink::Forward(forwarder),
        ReadySignal::new(),
    )
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let queue = EventQueue::new();
    let state = local_state(queue);
    let ready = state.ready.clone();

    let (status, json) = send(create_router(state.clone()), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["bot_ready"], false);
    assert_eq!(json["queue_size"], 0);
    assert_eq!(json["mode"], "queue");
    assert!(json["last_payload"].is_null());

    ready.mark_ready();
    let (_, json) = send(create_router(state), "GET", "/", None).await;
    assert_eq!(json["bot_ready"], true);
}

// ============================================================
// Ingress validation
// ============================================================

#[tokio::test]
async fn test_missing_discord_id_rejected() {
    let queue = EventQueue::new();
    let app = create_router(local_state(queue.clone()));

    let (status, json) = post_json(app, "/queue", json!({"result": "ok"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "Missing discordId");
    assert_eq!(queue.len().await, 0);
}

#[tokio::test]
async fn test_missing_result_rejected() {
    let queue = EventQueue::new();
    let app = create_router(local_state(queue.clone()));

    let (status, json) = post_json(app, "/queue", json!({"discordId": "1", "result": ""})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Missing result");
    assert_eq!(queue.len().await, 0);
}

#[tokio::test]
async fn test_non_numeric_id_rejected() {
    let queue = EventQueue::new();
    let app = create_router(local_state(queue.clone()));

    let (status, json) =
        post_json(app, "/webhook", json!({"discordId": "abc", "result": "ok"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
    assert_eq!(queue.len().await, 0);
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let queue = EventQueue::new();
    let app = create_router(local_state(queue.clone()));

    let (status, json) = send(app, "POST", "/queue", Some("{not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().unwrap().starts_with("Invalid JSON body"));
    assert_eq!(queue.len().await, 0);
}

#[tokio::test]
async fn test_json_body_accepted_without_json_content_type() {
    let queue = EventQueue::new();
    let state = local_state(queue.clone());
    let body = r#"{"discordId":"123","result":"ok"}"#;

    let (status, json) = post_raw(create_router(state.clone()), None, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queue_size"], 1);

    let (status, json) = post_raw(create_router(state.clone()), Some("text/plain"), body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queue_size"], 2);

    let (status, json) = post_raw(create_router(state), Some("text/plain"), "discordId=123").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["message"].as_str().unwrap().starts_with("Invalid JSON body"));
    assert_eq!(queue.len().await, 2);
}

// ============================================================
// Local queue sink
// ============================================================

#[tokio::test]
async fn test_valid_payload_is_queued() {
    let queue = EventQueue::new();
    let state = local_state(queue.clone());

    let (status, json) = post_json(
        create_router(state.clone()),
        "/queue",
        json!({"discordId": "123456789012345678", "result": "sikeres"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "queued");
    assert_eq!(json["queue_size"], 1);

    let (status, json) = post_json(
        create_router(state.clone()),
        "/webhook",
        json!({"discordId": 42, "result": "fail"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queue_size"], 2);

    let first = queue.dequeue().await;
    assert_eq!(first.subject_id, 123456789012345678);
    assert_eq!(first.result, "sikeres");
    assert_eq!(queue.dequeue().await.subject_id, 42);
}

#[tokio::test]
async fn test_health_reports_last_payload_and_depth() {
    let queue = EventQueue::new();
    let state = local_state(queue.clone());
    let payload = json!({"discordId": "7", "result": "ok"});

    post_json(create_router(state.clone()), "/queue", payload.clone()).await;
    let (_, json) = send(create_router(state), "GET", "/health", None).await;

    assert_eq!(json["queue_size"], 1);
    assert_eq!(json["last_payload"], payload);
}

#[tokio::test]
async fn test_full_queue_returns_service_unavailable() {
    let queue = EventQueue::with_capacity(Some(1));
    let state = local_state(queue.clone());
    let payload = json!({"discordId": "7", "result": "ok"});

    let (status, _) = post_json(create_router(state.clone()), "/queue", payload.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = post_json(create_router(state), "/queue", payload).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "error");
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn test_end_to_end_queue_to_role_grant() {
    const GUILD: u64 = 10;
    const CHANNEL: u64 = 20;
    const ROLE: u64 = 30;
    const BOT_ROLE: u64 = 31;
    const BOT: u64 = 99;
    const SUBJECT: u64 = 123456789012345678;

    let platform = Arc::new(
        MockPlatform::logged_in(BOT)
            .with_role(GUILD, 0, false)
            .with_role(ROLE, 1, false)
            .with_role(BOT_ROLE, 4, false)
            .with_member(BOT, &[BOT_ROLE])
            .with_member(SUBJECT, &[]),
    );
    let queue = EventQueue::new();
    let state = local_state(queue.clone());

    let (status, json) = post_json(
        create_router(state),
        "/queue",
        json!({"discordId": "123456789012345678", "result": "sikeres"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queue_size"], 1);

    let worker = DeliveryWorker::new(
        queue.clone(),
        platform.clone(),
        DeliverySettings {
            guild_id: GUILD,
            channel_id: CHANNEL,
            role_id: Some(ROLE),
            step_timeout: Duration::from_secs(1),
        },
    );
    let report = worker.process_next().await;

    assert_eq!(report.subject_id, SUBJECT);
    assert_eq!(report.direct_message, StepOutcome::Delivered);
    assert_eq!(report.announcement, StepOutcome::Delivered);
    assert_eq!(report.grant, Some(GrantOutcome::Granted));
    assert_eq!(platform.direct_messages()[0].0, SUBJECT);
    assert!(platform.channel_messages()[0]
        .1
        .contains("<@123456789012345678>"));
    assert_eq!(platform.grants().len(), 1);
    assert_eq!(queue.len().await, 0);
}

// ============================================================
// Forwarding sink
// ============================================================

#[tokio::test]
async fn test_forward_relays_payload_verbatim() {
    let (url, received) = spawn_downstream(StatusCode::OK).await;
    let app = create_router(forward_state(url));
    let payload = json!({"discordId": "5", "result": "pass", "extra": {"score": 97}});

    let (status, json) = post_json(app, "/webhook", payload.clone()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["forward_status"], 200);
    assert!(json["body"].as_str().unwrap().contains("queued"));
    assert_eq!(received.lock().unwrap().clone(), vec![payload]);
}

#[tokio::test]
async fn test_forward_reports_downstream_error() {
    let (url, received) = spawn_downstream(StatusCode::INTERNAL_SERVER_ERROR).await;
    let app = create_router(forward_state(url));

    let (status, json) = post_json(app, "/webhook", json!({"discordId": "5", "result": "ok"})).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["status"], "error");
    assert_eq!(json["forward_status"], 500);
    // Not retried
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_forward_validates_before_relaying() {
    let (url, received) = spawn_downstream(StatusCode::OK).await;
    let app = create_router(forward_state(url));

    let (status, json) = post_json(app, "/webhook", json!({"discordId": "5"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Missing result");
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_forward_mode_health() {
    let (url, _) = spawn_downstream(StatusCode::OK).await;
    let (status, json) = send(create_router(forward_state(url)), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["mode"], "forward");
    assert_eq!(json["queue_size"], 0);
}

#[tokio::test]
async fn test_forward_to_hanging_downstream_times_out() {
    let app = Router::new().route(
        "/queue",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            StatusCode::OK
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let state = forward_state_with_timeout(
        format!("http://{}/queue", addr),
        Duration::from_millis(200),
    );
    let (status, json) = tokio::time::timeout(
        Duration::from_secs(5),
        post_json(
            create_router(state),
            "/webhook",
            json!({"discordId": "5", "result": "ok"}),
        ),
    )
    .await
    .expect("forward timeout should bound the request");

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().unwrap().starts_with("Forward to downstream failed"));
}
