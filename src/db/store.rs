//! Persistence seam for jobs, batches and dead letters.
//!
//! Every mutating call on a job is conditional on the caller still holding
//! the lease; a `false` return means the row was not in the expected state
//! and nothing was written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::batch::{Batch, StatusCounts};
use crate::models::dead_letter::{DeadLetterEntry, DeadLetterStats, RetryCriteria};
use crate::models::error::ErrorRecord;
use crate::models::job::Job;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a batch and all of its jobs in one transaction.
    async fn insert_batch(&self, batch: &Batch, jobs: &[Job]) -> Result<(), StoreError>;

    /// Atomically lease the oldest claimable job, if any.
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// in_progress → completed.
    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// in_progress → pending with a new attempt count and schedule.
    async fn reschedule(
        &self,
        job_id: Uuid,
        worker_id: &str,
        attempts: i32,
        scheduled_at: DateTime<Utc>,
        error: &ErrorRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// in_progress → dead_lettered, inserting `entry` in the same transaction.
    async fn dead_letter(
        &self,
        job_id: Uuid,
        worker_id: &str,
        attempts: i32,
        entry: &DeadLetterEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// in_progress → pending without charging an attempt or touching lastError.
    async fn defer(
        &self,
        job_id: Uuid,
        worker_id: &str,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Return every in_progress job whose lease expired before `now` to
    /// pending. Returns the jobs as they were before the reset.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    /// pending → cancelled for one batch.
    async fn cancel_pending(&self, batch_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StoreError>;

    async fn batch_counts(&self, batch_id: Uuid) -> Result<StatusCounts, StoreError>;

    async fn queue_counts(&self) -> Result<StatusCounts, StoreError>;

    /// Oldest-first dead letters matching `criteria`, at most `limit`.
    async fn find_dead_letters(
        &self,
        criteria: &RetryCriteria,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, StoreError>;

    /// Insert `job` as a fresh attempt of dead letter `entry_id`, bump the
    /// entry's retry count and the owning batch's total, atomically. Fails
    /// with `NotFound` if the entry was already requeued.
    async fn requeue_dead_letter(&self, entry_id: Uuid, job: &Job) -> Result<(), StoreError>;

    async fn dead_letter_stats(&self) -> Result<DeadLetterStats, StoreError>;

    /// Delete dead letters quarantined strictly before `cutoff`.
    async fn delete_dead_letters_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
