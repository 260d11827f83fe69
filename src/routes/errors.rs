use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::dead_letter::DeadLetterError;
use crate::services::queue::QueueError;

/// Error surfaced by an API handler, rendered as `{error, message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    DeadLetter(#[from] DeadLetterError),

    #[error("{0}")]
    Validation(String),

    #[error("batch {0} not found")]
    BatchNotFound(uuid::Uuid),
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::Validation(report.to_string())
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ApiError::Validation(_)
            | ApiError::Queue(QueueError::Validation(_))
            | ApiError::DeadLetter(DeadLetterError::InvalidRetention(_)) => {
                json_error(StatusCode::BAD_REQUEST, "validation_error", message)
            }
            ApiError::BatchNotFound(_) | ApiError::Queue(QueueError::NotFound(_)) => {
                json_error(StatusCode::NOT_FOUND, "not_found", message)
            }
            ApiError::Queue(QueueError::NotLeaseHolder { .. })
            | ApiError::Queue(QueueError::InvalidTransition { .. }) => {
                json_error(StatusCode::CONFLICT, "conflict", message)
            }
            ApiError::Queue(QueueError::Store(_)) | ApiError::DeadLetter(DeadLetterError::Store(_)) => {
                tracing::error!(error = %message, "Store failure while serving request");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage unavailable")
            }
        }
    }
}
