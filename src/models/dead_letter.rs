use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::error::{ErrorKind, ErrorRecord};
use crate::models::job::Job;

/// Quarantine record of a permanently failed job. Kept for audit after a
/// bulk retry; only age-based cleanup removes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub original_job_id: Uuid,
    pub batch_id: Uuid,
    pub platform: String,
    pub payload: serde_json::Value,
    /// Attempt budget of the original job, reused when requeued.
    pub max_attempts: i32,
    pub final_error: ErrorRecord,
    pub quarantined_at: DateTime<Utc>,
    /// Number of times this entry has been bulk-retried.
    pub retry_count: i32,
}

impl DeadLetterEntry {
    pub fn for_job(job: &Job, final_error: ErrorRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_job_id: job.id,
            batch_id: job.batch_id,
            platform: job.platform.clone(),
            payload: job.payload.clone(),
            max_attempts: job.max_attempts,
            final_error,
            quarantined_at: now,
            retry_count: 0,
        }
    }
}

/// Filter for selecting dead letters. Unset fields match everything.
/// Entries already requeued are superseded by their new job and never match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryCriteria {
    pub platform: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub batch_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl RetryCriteria {
    pub fn matches(&self, entry: &DeadLetterEntry) -> bool {
        entry.retry_count == 0
            && self.platform.as_deref().map_or(true, |p| entry.platform == p)
            && self.error_kind.map_or(true, |k| entry.final_error.kind == k)
            && self.batch_id.map_or(true, |b| entry.batch_id == b)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryFailure {
    pub entry_id: Uuid,
    pub error: String,
}

/// Outcome of a bulk retry; partial success is normal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkRetryReport {
    pub retried_count: usize,
    pub failed_count: usize,
    pub errors: Vec<RetryFailure>,
    pub new_job_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterStats {
    pub total: i64,
    pub by_platform: BTreeMap<String, i64>,
    pub by_error_kind: BTreeMap<String, i64>,
    /// Entries that have been bulk-retried at least once.
    pub retried: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(platform: &str, kind: ErrorKind) -> DeadLetterEntry {
        DeadLetterEntry {
            id: Uuid::new_v4(),
            original_job_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            platform: platform.to_string(),
            payload: serde_json::json!({"sku": "A-1"}),
            max_attempts: 3,
            final_error: ErrorRecord::from_kind(kind, "boom"),
            quarantined_at: Utc::now(),
            retry_count: 0,
        }
    }

    #[test]
    fn test_empty_criteria_match_everything() {
        let criteria = RetryCriteria::default();
        assert!(criteria.matches(&entry("shopee", ErrorKind::RateLimited)));
        assert!(criteria.matches(&entry("tokopedia", ErrorKind::Validation)));
    }

    #[test]
    fn test_criteria_combine_with_and() {
        let criteria = RetryCriteria {
            platform: Some("shopee".into()),
            error_kind: Some(ErrorKind::RateLimited),
            ..Default::default()
        };
        assert!(criteria.matches(&entry("shopee", ErrorKind::RateLimited)));
        assert!(!criteria.matches(&entry("shopee", ErrorKind::Timeout)));
        assert!(!criteria.matches(&entry("lazada", ErrorKind::RateLimited)));
    }

    #[test]
    fn test_requeued_entries_never_match() {
        let mut retried = entry("shopee", ErrorKind::RateLimited);
        retried.retry_count = 1;
        assert!(!RetryCriteria::default().matches(&retried));
    }
}
