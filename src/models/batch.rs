use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A group of jobs submitted together. Per-status counts are never stored;
/// they are aggregated from member jobs on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub platform: String,
    pub total_jobs: i64,
    pub created_at: DateTime<Utc>,
}

/// Job counts grouped by status bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    /// Dead-lettered jobs.
    pub failed: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.completed + self.failed + self.cancelled
    }

    pub fn add(&mut self, status: crate::models::job::JobStatus, n: i64) {
        use crate::models::job::JobStatus;
        match status {
            JobStatus::Pending | JobStatus::FailedRetryable => self.pending += n,
            JobStatus::InProgress => self.in_progress += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::DeadLettered => self.failed += n,
            JobStatus::Cancelled => self.cancelled += n,
        }
    }
}

/// Point-in-time progress of one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchStatus {
    pub batch_id: Uuid,
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub progress_percent: u8,
    /// Coarse heuristic: outstanding jobs times a fixed per-job estimate.
    pub estimated_remaining_seconds: u64,
}

impl BatchStatus {
    /// Status for an unknown batch: every count is zero.
    pub fn empty(batch_id: Uuid) -> Self {
        Self::from_counts(batch_id, 0, StatusCounts::default(), 0.0)
    }

    pub fn from_counts(
        batch_id: Uuid,
        total: i64,
        counts: StatusCounts,
        per_job_estimate_secs: f64,
    ) -> Self {
        let finished = counts.completed + counts.failed + counts.cancelled;
        let progress_percent = if total > 0 {
            ((finished as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        let outstanding = (counts.pending + counts.in_progress).max(0) as f64;

        Self {
            batch_id,
            total,
            pending: counts.pending,
            in_progress: counts.in_progress,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            progress_percent,
            estimated_remaining_seconds: (outstanding * per_job_estimate_secs).ceil() as u64,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.total == 0
    }

    /// No job is pending or in progress.
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }
}
