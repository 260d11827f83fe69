use axum::extract::State;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::dead_letter::{BulkRetryReport, DeadLetterStats, RetryCriteria};
use crate::models::requests::{BulkRetryRequest, CleanupRequest, CleanupResponse};
use crate::routes::errors::ApiError;

/// GET /api/v1/dead-letters/stats
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<DeadLetterStats>, ApiError> {
    Ok(Json(state.dead_letters.get_stats().await?))
}

/// POST /api/v1/dead-letters/retry — Requeue matching dead letters as new jobs.
pub async fn bulk_retry(
    State(state): State<AppState>,
    Json(request): Json<BulkRetryRequest>,
) -> Result<Json<BulkRetryReport>, ApiError> {
    request.validate()?;

    let criteria = RetryCriteria {
        platform: request.platform,
        error_kind: request.error_kind,
        batch_id: request.batch_id,
        limit: request.limit,
    };
    Ok(Json(state.dead_letters.bulk_retry(&criteria).await?))
}

/// POST /api/v1/dead-letters/cleanup — Drop entries older than N days.
pub async fn cleanup(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let removed_count = state
        .dead_letters
        .cleanup_old_jobs(request.older_than_days)
        .await?;
    Ok(Json(CleanupResponse { removed_count }))
}
