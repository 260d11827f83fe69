use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::batch::BatchStatus;
use crate::models::requests::{CancelBatchResponse, SubmitBatchRequest, SubmitBatchResponse};
use crate::routes::errors::ApiError;

/// POST /api/v1/batches — Submit a batch of items for one platform.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<SubmitBatchRequest>,
) -> Result<Json<SubmitBatchResponse>, ApiError> {
    request.validate()?;

    let batch_id = state
        .queue
        .enqueue_batch(&request.platform, request.items, request.max_attempts)
        .await?;

    Ok(Json(SubmitBatchResponse { batch_id }))
}

/// GET /api/v1/batches/{batch_id} — Progress of a batch.
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatus>, ApiError> {
    let status = state.status.batch_status(batch_id).await?;
    if status.is_not_found() {
        return Err(ApiError::BatchNotFound(batch_id));
    }
    Ok(Json(status))
}

/// POST /api/v1/batches/{batch_id}/cancel — Cancel jobs not yet started.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<CancelBatchResponse>, ApiError> {
    let cancelled = state.queue.cancel_batch(batch_id).await?;
    Ok(Json(CancelBatchResponse { cancelled }))
}
