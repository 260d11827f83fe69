use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::error::ErrorKind;

/// Request to submit a batch of items for one platform.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitBatchRequest {
    #[garde(length(min = 1, max = 64))]
    pub platform: String,

    #[garde(length(min = 1, max = 1000))]
    pub items: Vec<serde_json::Value>,

    #[garde(range(min = 1, max = 10))]
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    pub batch_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelBatchResponse {
    pub cancelled: u64,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct BulkRetryRequest {
    #[garde(skip)]
    pub platform: Option<String>,

    #[garde(skip)]
    pub error_kind: Option<ErrorKind>,

    #[garde(skip)]
    pub batch_id: Option<Uuid>,

    #[garde(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub older_than_days: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_rejects_empty_items() {
        let req = SubmitBatchRequest {
            platform: "shopee".into(),
            items: vec![],
            max_attempts: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_submit_rejects_attempts_out_of_range() {
        let req = SubmitBatchRequest {
            platform: "shopee".into(),
            items: vec![serde_json::json!({"sku": "1"})],
            max_attempts: Some(0),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_submit_accepts_defaults() {
        let req = SubmitBatchRequest {
            platform: "shopee".into(),
            items: vec![serde_json::json!({"sku": "1"})],
            max_attempts: None,
        };
        assert!(req.validate().is_ok());
    }
}
