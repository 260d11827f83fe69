use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::store::{QueueStore, StoreError};
use crate::models::batch::{Batch, StatusCounts};
use crate::models::dead_letter::{DeadLetterEntry, DeadLetterStats, RetryCriteria};
use crate::models::error::{ErrorKind, ErrorRecord};
use crate::models::job::{Job, JobStatus};

const JOB_COLUMNS: &str = "id, batch_id, platform, payload, status, attempts, max_attempts, \
     scheduled_at, lease_owner, lease_expires_at, last_error, created_at, updated_at";

const DEAD_LETTER_COLUMNS: &str = "id, original_job_id, batch_id, platform, payload, \
     max_attempts, final_error, quarantined_at, retry_count";

/// Postgres-backed store. Claims lock a single row with
/// `FOR UPDATE SKIP LOCKED`, so workers never wait on each other.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status)
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{status}'")))?;
    let last_error: Option<serde_json::Value> = row.try_get("last_error")?;
    let last_error = last_error
        .map(serde_json::from_value::<ErrorRecord>)
        .transpose()?;

    Ok(Job {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        platform: row.try_get("platform")?,
        payload: row.try_get("payload")?,
        status,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        scheduled_at: row.try_get("scheduled_at")?,
        lease_owner: row.try_get("lease_owner")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        last_error,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn dead_letter_from_row(row: &PgRow) -> Result<DeadLetterEntry, StoreError> {
    let final_error: serde_json::Value = row.try_get("final_error")?;
    Ok(DeadLetterEntry {
        id: row.try_get("id")?,
        original_job_id: row.try_get("original_job_id")?,
        batch_id: row.try_get("batch_id")?,
        platform: row.try_get("platform")?,
        payload: row.try_get("payload")?,
        max_attempts: row.try_get("max_attempts")?,
        final_error: serde_json::from_value(final_error)?,
        quarantined_at: row.try_get("quarantined_at")?,
        retry_count: row.try_get("retry_count")?,
    })
}

fn counts_from_rows(rows: &[PgRow]) -> Result<StatusCounts, StoreError> {
    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("count")?;
        let status = JobStatus::from_str(&status)
            .map_err(|_| StoreError::Corrupt(format!("unknown job status '{status}'")))?;
        counts.add(status, n);
    }
    Ok(counts)
}

async fn insert_job<'e, E>(executor: E, job: &Job) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO sync_jobs (id, batch_id, platform, payload, status, attempts, max_attempts,
                               scheduled_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        "#,
    )
    .bind(job.id)
    .bind(job.batch_id)
    .bind(&job.platform)
    .bind(&job.payload)
    .bind(job.status.to_string())
    .bind(job.attempts)
    .bind(job.max_attempts)
    .bind(job.scheduled_at)
    .bind(job.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl QueueStore for PgStore {
    async fn insert_batch(&self, batch: &Batch, jobs: &[Job]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sync_batches (id, platform, total_jobs, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(batch.id)
        .bind(&batch.platform)
        .bind(batch.total_jobs)
        .bind(batch.created_at)
        .execute(&mut *tx)
        .await?;

        for job in jobs {
            insert_job(&mut *tx, job).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE sync_jobs
            SET status = 'in_progress',
                lease_owner = $1,
                lease_expires_at = $2,
                updated_at = $3
            WHERE id = (
                SELECT id
                FROM sync_jobs
                WHERE status = 'pending'
                  AND scheduled_at <= $3
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(worker_id)
            .bind(lease_expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'completed',
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $3
            WHERE id = $1 AND status = 'in_progress' AND lease_owner = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
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
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'pending',
                attempts = $3,
                scheduled_at = $4,
                last_error = $5,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $6
            WHERE id = $1 AND status = 'in_progress' AND lease_owner = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(attempts)
        .bind(scheduled_at)
        .bind(serde_json::to_value(error)?)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        worker_id: &str,
        attempts: i32,
        entry: &DeadLetterEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let final_error = serde_json::to_value(&entry.final_error)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'dead_lettered',
                attempts = $3,
                last_error = $4,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $5
            WHERE id = $1 AND status = 'in_progress' AND lease_owner = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(attempts)
        .bind(&final_error)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO sync_dead_letters (id, original_job_id, batch_id, platform, payload,
                                           max_attempts, error_kind, final_error,
                                           quarantined_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.original_job_id)
        .bind(entry.batch_id)
        .bind(&entry.platform)
        .bind(&entry.payload)
        .bind(entry.max_attempts)
        .bind(entry.final_error.kind.to_string())
        .bind(&final_error)
        .bind(entry.quarantined_at)
        .bind(entry.retry_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn defer(
        &self,
        job_id: Uuid,
        worker_id: &str,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'pending',
                scheduled_at = $3,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $4
            WHERE id = $1 AND status = 'in_progress' AND lease_owner = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(scheduled_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        // The CTE captures the pre-update row so the caller can log the
        // previous lease owner.
        let sql = format!(
            r#"
            WITH expired AS (
                SELECT {JOB_COLUMNS}
                FROM sync_jobs
                WHERE status = 'in_progress'
                  AND lease_expires_at IS NOT NULL
                  AND lease_expires_at < $1
                FOR UPDATE SKIP LOCKED
            ), reset AS (
                UPDATE sync_jobs j
                SET status = 'pending',
                    scheduled_at = $1,
                    lease_owner = NULL,
                    lease_expires_at = NULL,
                    updated_at = $1
                FROM expired
                WHERE j.id = expired.id
                RETURNING j.id
            )
            SELECT expired.* FROM expired JOIN reset ON reset.id = expired.id
            "#
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn cancel_pending(&self, batch_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'cancelled', updated_at = $2
            WHERE batch_id = $1 AND status = 'pending'
            "#,
        )
        .bind(batch_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query(
            "SELECT id, platform, total_jobs, created_at FROM sync_batches WHERE id = $1",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Some(Batch {
                id: r.try_get("id")?,
                platform: r.try_get("platform")?,
                total_jobs: r.try_get("total_jobs")?,
                created_at: r.try_get("created_at")?,
            }),
            None => None,
        })
    }

    async fn batch_counts(&self, batch_id: Uuid) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM sync_jobs
            WHERE batch_id = $1
            GROUP BY status
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        counts_from_rows(&rows)
    }

    async fn queue_counts(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM sync_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        counts_from_rows(&rows)
    }

    async fn find_dead_letters(
        &self,
        criteria: &RetryCriteria,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let sql = format!(
            r#"
            SELECT {DEAD_LETTER_COLUMNS}
            FROM sync_dead_letters
            WHERE retry_count = 0
              AND ($1::TEXT IS NULL OR platform = $1)
              AND ($2::TEXT IS NULL OR error_kind = $2)
              AND ($3::UUID IS NULL OR batch_id = $3)
            ORDER BY quarantined_at ASC, id ASC
            LIMIT $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(criteria.platform.as_deref())
            .bind(criteria.error_kind.map(|k| k.to_string()))
            .bind(criteria.batch_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(dead_letter_from_row).collect()
    }

    async fn requeue_dead_letter(&self, entry_id: Uuid, job: &Job) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            "UPDATE sync_dead_letters SET retry_count = retry_count + 1 \
             WHERE id = $1 AND retry_count = 0",
        )
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("unretried dead letter {entry_id}")));
        }

        let grown = sqlx::query("UPDATE sync_batches SET total_jobs = total_jobs + 1 WHERE id = $1")
            .bind(job.batch_id)
            .execute(&mut *tx)
            .await?;
        if grown.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("batch {}", job.batch_id)));
        }

        insert_job(&mut *tx, job).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn dead_letter_stats(&self) -> Result<DeadLetterStats, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT platform, error_kind, COUNT(*) AS count,
                   COUNT(*) FILTER (WHERE retry_count > 0) AS retried
            FROM sync_dead_letters
            GROUP BY platform, error_kind
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = DeadLetterStats::default();
        for row in rows {
            let platform: String = row.try_get("platform")?;
            let kind: String = row.try_get("error_kind")?;
            let count: i64 = row.try_get("count")?;
            let retried: i64 = row.try_get("retried")?;
            // Normalise through the enum so stats keys match the in-memory store.
            let kind = ErrorKind::from_str(&kind)
                .map(|k| k.to_string())
                .unwrap_or(kind);

            stats.total += count;
            stats.retried += retried;
            *stats.by_platform.entry(platform).or_default() += count;
            *stats.by_error_kind.entry(kind).or_default() += count;
        }
        Ok(stats)
    }

    async fn delete_dead_letters_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sync_dead_letters WHERE quarantined_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
