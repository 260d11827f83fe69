pub mod batches;
pub mod dead_letters;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod queue;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// API and health routes. `/metrics` is attached by the binary since it
/// carries its own state.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/batches", post(batches::submit_batch))
        .route("/api/v1/batches/{batch_id}", get(batches::get_batch_status))
        .route("/api/v1/batches/{batch_id}/cancel", post(batches::cancel_batch))
        .route("/api/v1/queue/stats", get(queue::get_queue_stats))
        .route("/api/v1/dead-letters/stats", get(dead_letters::get_stats))
        .route("/api/v1/dead-letters/retry", post(dead_letters::bulk_retry))
        .route("/api/v1/dead-letters/cleanup", post(dead_letters::cleanup))
        .with_state(state)
}
