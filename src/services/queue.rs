use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::store::{QueueStore, StoreError};
use crate::models::batch::{Batch, BatchStatus, StatusCounts};
use crate::models::dead_letter::DeadLetterEntry;
use crate::models::error::ErrorRecord;
use crate::models::job::Job;
use crate::services::clock::Clock;
use crate::services::events::{publish, EventSink, QueueEvent};
use crate::services::platform::CallError;
use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub default_max_attempts: i32,
    pub lease_duration: Duration,
    /// Fixed per-job estimate behind `estimated_remaining_seconds`.
    pub per_job_estimate: Duration,
    /// Backoff between queue-level attempts of one job.
    pub backoff: RetryPolicy,
    /// Run the lease reaper before every claim.
    pub reclaim_on_claim: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            lease_duration: Duration::from_secs(300),
            per_job_estimate: Duration::from_secs(30),
            backoff: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(900),
                jitter: 0.2,
            },
            reclaim_on_claim: true,
        }
    }
}

/// What `fail_job` did with the job.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    Rescheduled {
        attempts: i32,
        scheduled_at: DateTime<Utc>,
    },
    DeadLettered {
        entry_id: Uuid,
        attempts: i32,
    },
    /// Dependency unavailable; released without charging an attempt.
    Deferred {
        scheduled_at: DateTime<Utc>,
    },
}

/// Job lifecycle and batch tracking over an injected store.
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a batch and one pending job per item, atomically.
    pub async fn enqueue_batch(
        &self,
        platform: &str,
        items: Vec<serde_json::Value>,
        max_attempts: Option<i32>,
    ) -> Result<Uuid, QueueError> {
        let platform = platform.trim();
        if platform.is_empty() {
            return Err(QueueError::Validation("platform must not be empty".into()));
        }
        if items.is_empty() {
            return Err(QueueError::Validation("batch must contain at least one item".into()));
        }
        let max_attempts = max_attempts.unwrap_or(self.config.default_max_attempts);
        if max_attempts < 1 {
            return Err(QueueError::Validation("max_attempts must be at least 1".into()));
        }

        let now = self.clock.now();
        let batch = Batch {
            id: Uuid::new_v4(),
            platform: platform.to_string(),
            total_jobs: items.len() as i64,
            created_at: now,
        };
        let jobs: Vec<Job> = items
            .into_iter()
            .map(|payload| Job::new(batch.id, platform, payload, max_attempts, now))
            .collect();

        self.store.insert_batch(&batch, &jobs).await?;

        tracing::info!(
            batch_id = %batch.id,
            platform,
            total_jobs = jobs.len(),
            max_attempts,
            "Batch submitted"
        );
        metrics::counter!("sync_jobs_submitted_total", "platform" => platform.to_string())
            .increment(jobs.len() as u64);
        publish(
            self.events.as_ref(),
            QueueEvent::BatchSubmitted {
                batch_id: batch.id,
                platform: platform.to_string(),
                total_jobs: jobs.len(),
            },
        )
        .await;

        Ok(batch.id)
    }

    /// Lease the oldest claimable job to `worker_id`.
    pub async fn claim(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<Job>, QueueError> {
        if self.config.reclaim_on_claim {
            self.reclaim_expired_leases().await?;
        }

        let now = self.clock.now();
        let expires_at = now + chrono_duration(lease_duration);
        let Some(job) = self.store.claim_next(worker_id, now, expires_at).await? else {
            return Ok(None);
        };

        tracing::debug!(
            job_id = %job.id,
            batch_id = %job.batch_id,
            worker_id,
            attempts = job.attempts,
            "Job claimed"
        );
        publish(
            self.events.as_ref(),
            QueueEvent::JobClaimed {
                job_id: job.id,
                worker_id: worker_id.to_string(),
                attempts: job.attempts,
            },
        )
        .await;

        Ok(Some(job))
    }

    pub async fn complete_job(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let now = self.clock.now();
        if !self.store.complete(job_id, worker_id, now).await? {
            return Err(self.rejection(job_id, worker_id).await);
        }

        tracing::info!(job_id = %job_id, worker_id, "Job completed");
        metrics::counter!("sync_jobs_completed_total").increment(1);
        publish(
            self.events.as_ref(),
            QueueEvent::JobCompleted {
                job_id,
                worker_id: worker_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Record a failed attempt: reschedule with backoff, quarantine, or (for
    /// an open circuit) defer without touching the job's error history.
    pub async fn fail_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &CallError,
    ) -> Result<FailOutcome, QueueError> {
        if let CallError::CircuitOpen { retry_in, .. } = error {
            let scheduled_at = self.defer(job_id, worker_id, *retry_in).await?;
            return Ok(FailOutcome::Deferred { scheduled_at });
        }
        self.fail_job_with_record(job_id, worker_id, error.record())
            .await
    }

    pub async fn fail_job_with_record(
        &self,
        job_id: Uuid,
        worker_id: &str,
        record: ErrorRecord,
    ) -> Result<FailOutcome, QueueError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))?;
        if !job.is_leased_by(worker_id) {
            return Err(self.rejection(job_id, worker_id).await);
        }

        let now = self.clock.now();
        let attempts = job.attempts + 1;

        if record.retryable && attempts < job.max_attempts {
            let scheduled_at = now + chrono_duration(self.retry_delay(attempts, &record));
            if !self
                .store
                .reschedule(job_id, worker_id, attempts, scheduled_at, &record, now)
                .await?
            {
                return Err(self.rejection(job_id, worker_id).await);
            }

            tracing::warn!(
                job_id = %job_id,
                batch_id = %job.batch_id,
                platform = %job.platform,
                attempts,
                max_attempts = job.max_attempts,
                error_kind = %record.kind,
                scheduled_at = %scheduled_at,
                "Job attempt failed, rescheduled"
            );
            metrics::counter!(
                "sync_jobs_retried_total",
                "platform" => job.platform.clone(),
                "kind" => record.kind.to_string()
            )
            .increment(1);
            publish(
                self.events.as_ref(),
                QueueEvent::JobRetryScheduled {
                    job_id,
                    attempts,
                    error_kind: record.kind,
                    scheduled_at,
                },
            )
            .await;

            return Ok(FailOutcome::Rescheduled {
                attempts,
                scheduled_at,
            });
        }

        let kind = record.kind;
        let retryable = record.retryable;
        let entry = DeadLetterEntry::for_job(&job, record, now);
        if !self
            .store
            .dead_letter(job_id, worker_id, attempts, &entry, now)
            .await?
        {
            return Err(self.rejection(job_id, worker_id).await);
        }

        tracing::error!(
            job_id = %job_id,
            batch_id = %job.batch_id,
            platform = %job.platform,
            entry_id = %entry.id,
            attempts,
            error_kind = %kind,
            retryable,
            "Job dead-lettered"
        );
        metrics::counter!(
            "sync_jobs_dead_lettered_total",
            "platform" => job.platform.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
        publish(
            self.events.as_ref(),
            QueueEvent::JobDeadLettered {
                job_id,
                entry_id: entry.id,
                attempts,
                error_kind: kind,
            },
        )
        .await;

        Ok(FailOutcome::DeadLettered {
            entry_id: entry.id,
            attempts,
        })
    }

    /// Release a leased job back to pending after `delay`, no attempt charged.
    pub async fn defer(
        &self,
        job_id: Uuid,
        worker_id: &str,
        delay: Duration,
    ) -> Result<DateTime<Utc>, QueueError> {
        let now = self.clock.now();
        let scheduled_at = now + chrono_duration(delay);
        if !self.store.defer(job_id, worker_id, scheduled_at, now).await? {
            return Err(self.rejection(job_id, worker_id).await);
        }

        tracing::info!(job_id = %job_id, worker_id, scheduled_at = %scheduled_at, "Job deferred, dependency unavailable");
        publish(
            self.events.as_ref(),
            QueueEvent::JobDeferred {
                job_id,
                scheduled_at,
            },
        )
        .await;
        Ok(scheduled_at)
    }

    /// Return jobs with expired leases to pending. Worker crashes are not
    /// charged as attempts.
    pub async fn reclaim_expired_leases(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let reclaimed = self.store.reclaim_expired(now).await?;

        for job in &reclaimed {
            tracing::warn!(
                job_id = %job.id,
                batch_id = %job.batch_id,
                previous_owner = job.lease_owner.as_deref().unwrap_or("unknown"),
                lease_expires_at = ?job.lease_expires_at,
                attempts = job.attempts,
                "Lease expired without completion, job requeued"
            );
            publish(
                self.events.as_ref(),
                QueueEvent::LeaseReclaimed {
                    job_id: job.id,
                    previous_owner: job.lease_owner.clone(),
                },
            )
            .await;
        }
        if !reclaimed.is_empty() {
            metrics::counter!("sync_leases_reclaimed_total").increment(reclaimed.len() as u64);
        }

        Ok(reclaimed.len())
    }

    /// Cancel every still-pending job of a batch. In-progress jobs run on.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<u64, QueueError> {
        if self.store.get_batch(batch_id).await?.is_none() {
            return Err(QueueError::NotFound(batch_id));
        }
        let cancelled = self.store.cancel_pending(batch_id, self.clock.now()).await?;

        tracing::info!(batch_id = %batch_id, cancelled, "Batch cancelled");
        publish(
            self.events.as_ref(),
            QueueEvent::BatchCancelled {
                batch_id,
                cancelled,
            },
        )
        .await;
        Ok(cancelled)
    }

    /// Progress of a batch; unknown batches report `total == 0`.
    pub async fn get_batch_status(&self, batch_id: Uuid) -> Result<BatchStatus, QueueError> {
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            return Ok(BatchStatus::empty(batch_id));
        };
        let counts = self.store.batch_counts(batch_id).await?;
        if counts.total() != batch.total_jobs {
            tracing::warn!(
                batch_id = %batch_id,
                total_jobs = batch.total_jobs,
                counted = counts.total(),
                "Batch job count drifted from recorded total"
            );
        }
        Ok(BatchStatus::from_counts(
            batch_id,
            batch.total_jobs,
            counts,
            self.config.per_job_estimate.as_secs_f64(),
        ))
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get_job(job_id).await?)
    }

    pub async fn queue_counts(&self) -> Result<StatusCounts, QueueError> {
        Ok(self.store.queue_counts().await?)
    }

    /// Create a fresh job for a dead letter in its original batch.
    pub async fn requeue_dead_letter(&self, entry: &DeadLetterEntry) -> Result<Uuid, QueueError> {
        let job = Job::new(
            entry.batch_id,
            &entry.platform,
            entry.payload.clone(),
            entry.max_attempts,
            self.clock.now(),
        );
        self.store.requeue_dead_letter(entry.id, &job).await?;

        tracing::info!(
            entry_id = %entry.id,
            original_job_id = %entry.original_job_id,
            job_id = %job.id,
            batch_id = %entry.batch_id,
            "Dead letter requeued"
        );
        Ok(job.id)
    }

    /// Exponential backoff for the next attempt, never shorter than the
    /// classifier's suggested delay.
    fn retry_delay(&self, attempts: i32, record: &ErrorRecord) -> Duration {
        let backoff = self.config.backoff.jittered_backoff(attempts.max(1) as u32);
        let suggested = record
            .suggested_retry_after_seconds
            .map(Duration::from_secs)
            .unwrap_or_default();
        backoff.max(suggested)
    }

    /// Explain why a conditional update on `job_id` matched nothing.
    async fn rejection(&self, job_id: Uuid, worker_id: &str) -> QueueError {
        match self.store.get_job(job_id).await {
            Ok(None) => QueueError::NotFound(job_id),
            Ok(Some(job)) if job.status.is_terminal() => QueueError::InvalidTransition {
                job_id,
                status: job.status.to_string(),
            },
            Ok(Some(_)) => QueueError::NotLeaseHolder {
                job_id,
                worker_id: worker_id.to_string(),
            },
            Err(e) => QueueError::Store(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Not found: {0}")]
    NotFound(Uuid),

    #[error("Worker {worker_id} does not hold the lease on job {job_id}")]
    NotLeaseHolder { job_id: Uuid, worker_id: String },

    #[error("Job {job_id} is already {status}")]
    InvalidTransition { job_id: Uuid, status: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
