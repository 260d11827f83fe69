use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::store::{QueueStore, StoreError};
use crate::models::batch::{Batch, StatusCounts};
use crate::models::dead_letter::{DeadLetterEntry, DeadLetterStats, RetryCriteria};
use crate::models::error::ErrorRecord;
use crate::models::job::{Job, JobStatus};

#[derive(Default)]
struct Tables {
    batches: HashMap<Uuid, Batch>,
    jobs: HashMap<Uuid, Job>,
    dead_letters: HashMap<Uuid, DeadLetterEntry>,
    failing_requeues: usize,
}

/// In-process store for tests and single-process development. One lock
/// guards all tables, so every operation is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` dead-letter requeues fail with `Unavailable`.
    pub fn fail_next_requeues(&self, n: usize) {
        self.tables.lock().failing_requeues = n;
    }

    /// Insert a dead letter directly, e.g. to seed aged entries.
    pub fn insert_dead_letter(&self, entry: DeadLetterEntry) {
        self.tables.lock().dead_letters.insert(entry.id, entry);
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        let mut entries: Vec<_> = self.tables.lock().dead_letters.values().cloned().collect();
        entries.sort_by_key(|e| (e.quarantined_at, e.id));
        entries
    }

    pub fn jobs_in_batch(&self, batch_id: Uuid) -> Vec<Job> {
        let mut jobs: Vec<_> = self
            .tables
            .lock()
            .jobs
            .values()
            .filter(|j| j.batch_id == batch_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }
}

fn leased_mut<'a>(tables: &'a mut Tables, job_id: Uuid, worker_id: &str) -> Option<&'a mut Job> {
    tables
        .jobs
        .get_mut(&job_id)
        .filter(|job| job.is_leased_by(worker_id))
}

fn release(job: &mut Job, now: DateTime<Utc>) {
    job.lease_owner = None;
    job.lease_expires_at = None;
    job.updated_at = now;
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert_batch(&self, batch: &Batch, jobs: &[Job]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables.batches.insert(batch.id, batch.clone());
        for job in jobs {
            tables.jobs.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut tables = self.tables.lock();
        let next = tables
            .jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .min_by_key(|job| (job.scheduled_at, job.created_at, job.id))
            .map(|job| job.id);

        Ok(next.and_then(|id| tables.jobs.get_mut(&id)).map(|job| {
            job.status = JobStatus::InProgress;
            job.lease_owner = Some(worker_id.to_string());
            job.lease_expires_at = Some(lease_expires_at);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.tables.lock().jobs.get(&job_id).cloned())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        Ok(match leased_mut(&mut tables, job_id, worker_id) {
            Some(job) => {
                job.status = JobStatus::Completed;
                release(job, now);
                true
            }
            None => false,
        })
    }

    async fn reschedule(
        &self,
        job_id: Uuid,
        worker_id: &str,
        attempts: i32,
        scheduled_at: DateTime<Utc>,
        error: &ErrorRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        Ok(match leased_mut(&mut tables, job_id, worker_id) {
            Some(job) => {
                job.status = JobStatus::Pending;
                job.attempts = attempts;
                job.scheduled_at = scheduled_at;
                job.last_error = Some(error.clone());
                release(job, now);
                true
            }
            None => false,
        })
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        worker_id: &str,
        attempts: i32,
        entry: &DeadLetterEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(job) = leased_mut(&mut tables, job_id, worker_id) else {
            return Ok(false);
        };
        job.status = JobStatus::DeadLettered;
        job.attempts = attempts;
        job.last_error = Some(entry.final_error.clone());
        release(job, now);
        tables.dead_letters.insert(entry.id, entry.clone());
        Ok(true)
    }

    async fn defer(
        &self,
        job_id: Uuid,
        worker_id: &str,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        Ok(match leased_mut(&mut tables, job_id, worker_id) {
            Some(job) => {
                job.status = JobStatus::Pending;
                job.scheduled_at = scheduled_at;
                release(job, now);
                true
            }
            None => false,
        })
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let mut tables = self.tables.lock();
        let mut reclaimed = Vec::new();
        for job in tables.jobs.values_mut().filter(|job| job.lease_expired(now)) {
            reclaimed.push(job.clone());
            job.status = JobStatus::Pending;
            job.scheduled_at = now;
            release(job, now);
        }
        Ok(reclaimed)
    }

    async fn cancel_pending(&self, batch_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let mut cancelled = 0;
        for job in tables
            .jobs
            .values_mut()
            .filter(|j| j.batch_id == batch_id && j.status == JobStatus::Pending)
        {
            job.status = JobStatus::Cancelled;
            job.updated_at = now;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StoreError> {
        Ok(self.tables.lock().batches.get(&batch_id).cloned())
    }

    async fn batch_counts(&self, batch_id: Uuid) -> Result<StatusCounts, StoreError> {
        let tables = self.tables.lock();
        let mut counts = StatusCounts::default();
        for job in tables.jobs.values().filter(|j| j.batch_id == batch_id) {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn queue_counts(&self) -> Result<StatusCounts, StoreError> {
        let tables = self.tables.lock();
        let mut counts = StatusCounts::default();
        for job in tables.jobs.values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn find_dead_letters(
        &self,
        criteria: &RetryCriteria,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let tables = self.tables.lock();
        let mut matching: Vec<_> = tables
            .dead_letters
            .values()
            .filter(|e| criteria.matches(e))
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.quarantined_at, e.id));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn requeue_dead_letter(&self, entry_id: Uuid, job: &Job) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables.failing_requeues > 0 {
            tables.failing_requeues -= 1;
            return Err(StoreError::Unavailable("injected requeue failure".into()));
        }
        if !tables
            .dead_letters
            .get(&entry_id)
            .is_some_and(|e| e.retry_count == 0)
        {
            return Err(StoreError::NotFound(format!("unretried dead letter {entry_id}")));
        }
        let batch = tables
            .batches
            .get_mut(&job.batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", job.batch_id)))?;
        batch.total_jobs += 1;
        if let Some(entry) = tables.dead_letters.get_mut(&entry_id) {
            entry.retry_count += 1;
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn dead_letter_stats(&self) -> Result<DeadLetterStats, StoreError> {
        let tables = self.tables.lock();
        let mut stats = DeadLetterStats::default();
        for entry in tables.dead_letters.values() {
            stats.total += 1;
            *stats.by_platform.entry(entry.platform.clone()).or_default() += 1;
            *stats
                .by_error_kind
                .entry(entry.final_error.kind.to_string())
                .or_default() += 1;
            if entry.retry_count > 0 {
                stats.retried += 1;
            }
        }
        Ok(stats)
    }

    async fn delete_dead_letters_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let before = tables.dead_letters.len();
        tables.dead_letters.retain(|_, e| e.quarantined_at >= cutoff);
        Ok((before - tables.dead_letters.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
