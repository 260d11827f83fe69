use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::routes::errors::ApiError;
use crate::services::stats::QueueStats;

/// GET /api/v1/queue/stats — Job counts across all batches.
pub async fn get_queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.status.queue_stats().await?))
}
