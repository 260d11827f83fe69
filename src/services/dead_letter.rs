use chrono::Duration;
use std::sync::Arc;

use crate::db::store::StoreError;
use crate::models::dead_letter::{BulkRetryReport, DeadLetterStats, RetryCriteria, RetryFailure};
use crate::services::events::{publish, QueueEvent};
use crate::services::queue::JobQueue;

pub const MIN_CLEANUP_DAYS: i64 = 1;
pub const MAX_CLEANUP_DAYS: i64 = 365;

/// Quarantine for permanently failed jobs.
pub struct DeadLetterStore {
    queue: Arc<JobQueue>,
    /// Applied when the caller gives no limit, and as an upper bound.
    retry_cap: usize,
}

impl DeadLetterStore {
    pub fn new(queue: Arc<JobQueue>, retry_cap: usize) -> Self {
        Self {
            queue,
            retry_cap: retry_cap.max(1),
        }
    }

    /// Re-enqueue matching entries as new jobs. Entries stay in place with
    /// their retry count bumped; per-entry failures are reported, not raised.
    pub async fn bulk_retry(&self, criteria: &RetryCriteria) -> Result<BulkRetryReport, DeadLetterError> {
        let limit = criteria
            .limit
            .unwrap_or(self.retry_cap)
            .min(self.retry_cap);
        let entries = self
            .queue
            .store()
            .find_dead_letters(criteria, limit)
            .await?;

        let mut report = BulkRetryReport::default();
        for entry in &entries {
            match self.queue.requeue_dead_letter(entry).await {
                Ok(job_id) => {
                    report.retried_count += 1;
                    report.new_job_ids.push(job_id);
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Failed to requeue dead letter");
                    report.failed_count += 1;
                    report.errors.push(RetryFailure {
                        entry_id: entry.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            matched = entries.len(),
            retried = report.retried_count,
            failed = report.failed_count,
            platform = criteria.platform.as_deref(),
            error_kind = criteria.error_kind.map(|k| k.to_string()),
            "Dead-letter bulk retry finished"
        );
        publish(
            self.queue.events().as_ref(),
            QueueEvent::DeadLettersRetried {
                retried: report.retried_count,
                failed: report.failed_count,
            },
        )
        .await;

        Ok(report)
    }

    /// Delete entries quarantined more than `older_than_days` ago.
    pub async fn cleanup_old_jobs(&self, older_than_days: i64) -> Result<u64, DeadLetterError> {
        if !(MIN_CLEANUP_DAYS..=MAX_CLEANUP_DAYS).contains(&older_than_days) {
            return Err(DeadLetterError::InvalidRetention(older_than_days));
        }

        let cutoff = self.queue.now() - Duration::days(older_than_days);
        let removed = self
            .queue
            .store()
            .delete_dead_letters_before(cutoff)
            .await?;

        tracing::info!(older_than_days, removed, cutoff = %cutoff, "Dead-letter cleanup finished");
        publish(
            self.queue.events().as_ref(),
            QueueEvent::DeadLettersCleaned {
                older_than_days,
                removed,
            },
        )
        .await;

        Ok(removed)
    }

    pub async fn get_stats(&self) -> Result<DeadLetterStats, DeadLetterError> {
        Ok(self.queue.store().dead_letter_stats().await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("older_than_days must be between 1 and 365, got {0}")]
    InvalidRetention(i64),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
