mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use marketplace_sync::{
    app_state::AppState,
    db::memory::MemoryStore,
    routes,
    services::{clock::ManualClock, events::TracingEventSink, queue::JobQueue},
};

use helpers::{start_time, test_queue_config};

fn app() -> Router {
    let queue = JobQueue::new(
        Arc::new(MemoryStore::new()),
        Arc::new(TracingEventSink),
        Arc::new(ManualClock::new(start_time())),
        test_queue_config(),
    );
    routes::api_router(AppState::new(queue, 100, None))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_submit_and_poll_batch() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/batches",
        Some(json!({ "platform": "shopee", "items": [{"sku": "A"}, {"sku": "B"}] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let batch_id = body["batch_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/api/v1/batches/{batch_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["pending"], 2);
    assert_eq!(body["progress_percent"], 0);

    let (status, body) = send(&app, "GET", "/api/v1/queue/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending"], 2);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/batches/{batch_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], 2);
}

#[tokio::test]
async fn test_submit_rejects_invalid_batch() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/batches",
        Some(json!({ "platform": "shopee", "items": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/batches",
        Some(json!({ "platform": "shopee", "items": [{}], "max_attempts": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let app = app();
    let id = Uuid::new_v4();

    let (status, body) = send(&app, "GET", &format!("/api/v1/batches/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = send(&app, "POST", &format!("/api/v1/batches/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dead_letter_endpoints() {
    let app = app();

    let (status, body) = send(&app, "GET", "/api/v1/dead-letters/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/dead-letters/retry",
        Some(json!({ "platform": "shopee" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retried_count"], 0);
    assert_eq!(body["failed_count"], 0);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/dead-letters/cleanup",
        Some(json!({ "older_than_days": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed_count"], 0);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/dead-letters/cleanup",
        Some(json!({ "older_than_days": 400 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_health_reports_store() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["database"]["status"], "ok");
    assert!(body["checks"].get("redis").is_none());
}
