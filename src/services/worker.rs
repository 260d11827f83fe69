use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::platform::{CallError, PlatformAdapter};
use crate::services::queue::{FailOutcome, JobQueue, QueueError};
use crate::services::retry::{self, RetryPolicy};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Hard limit on a single call to the platform.
    pub job_timeout: Duration,
    pub lease_duration: Duration,
    pub reaper_interval: Duration,
    /// In-call retries before the job goes back to the queue.
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(1000),
            job_timeout: Duration::from_secs(60),
            lease_duration: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// One queue consumer. Workers share the queue, breaker and adapter.
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    breaker: Arc<CircuitBreaker>,
    adapter: Arc<dyn PlatformAdapter>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<JobQueue>,
        breaker: Arc<CircuitBreaker>,
        adapter: Arc<dyn PlatformAdapter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            breaker,
            adapter,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Poll until shutdown is signalled. A job already claimed always runs
    /// to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.id, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next_job().await {
                Ok(true) => {
                    tracing::trace!(worker_id = %self.id, "Job processed, checking for next job");
                    false
                }
                Ok(false) => true,
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Error processing job, will retry");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    /// Claim and execute one job.
    /// Returns Ok(true) if a job was processed, Ok(false) if none was claimable.
    pub async fn process_next_job(&self) -> Result<bool, QueueError> {
        let job = match self.queue.claim(&self.id, self.config.lease_duration).await? {
            Some(j) => j,
            None => return Ok(false),
        };

        tracing::info!(
            job_id = %job.id,
            batch_id = %job.batch_id,
            platform = %job.platform,
            worker_id = %self.id,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            "Processing sync job"
        );

        let started = Instant::now();
        let breaker = self.breaker.as_ref();
        let adapter = self.adapter.as_ref();
        let platform = job.platform.as_str();
        let payload = &job.payload;
        let job_timeout = self.config.job_timeout;

        let result = retry::execute(&self.config.retry, move |_attempt| async move {
            breaker
                .execute(platform, move || async move {
                    match timeout(job_timeout, adapter.perform_request(platform, payload)).await {
                        Ok(outcome) => outcome.map_err(CallError::from),
                        Err(_) => Err(CallError::Timeout(job_timeout)),
                    }
                })
                .await
        })
        .await;

        metrics::histogram!("sync_job_duration_seconds", "platform" => job.platform.clone())
            .record(started.elapsed().as_secs_f64());

        // A lost lease means the reaper already handed the job to someone else.
        let recorded = match result {
            Ok(_) => self.queue.complete_job(job.id, &self.id).await.map(|_| ()),
            Err(e) => self
                .queue
                .fail_job(job.id, &self.id, &e)
                .await
                .map(|outcome| log_failure(&job.id, &e, &outcome)),
        };
        match recorded {
            Ok(()) => Ok(true),
            Err(e @ (QueueError::NotLeaseHolder { .. } | QueueError::InvalidTransition { .. })) => {
                tracing::warn!(job_id = %job.id, worker_id = %self.id, error = %e, "Outcome discarded, lease lost");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

fn log_failure(job_id: &uuid::Uuid, error: &CallError, outcome: &FailOutcome) {
    match outcome {
        FailOutcome::Deferred { scheduled_at } => {
            tracing::info!(job_id = %job_id, scheduled_at = %scheduled_at, error = %error, "Job deferred");
        }
        FailOutcome::Rescheduled { attempts, .. } => {
            tracing::debug!(job_id = %job_id, attempts, error = %error, "Job will be retried");
        }
        FailOutcome::DeadLettered { entry_id, .. } => {
            tracing::debug!(job_id = %job_id, entry_id = %entry_id, error = %error, "Job quarantined");
        }
    }
}

/// Fixed-size set of workers plus the lease reaper.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        queue: Arc<JobQueue>,
        breaker: Arc<CircuitBreaker>,
        adapter: Arc<dyn PlatformAdapter>,
        config: WorkerConfig,
        id_prefix: &str,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.concurrency + 1);

        for n in 0..config.concurrency.max(1) {
            let worker = Worker::new(
                format!("{id_prefix}-{n}"),
                queue.clone(),
                breaker.clone(),
                adapter.clone(),
                config.clone(),
            );
            handles.push(tokio::spawn(worker.run(rx.clone())));
        }
        handles.push(tokio::spawn(run_reaper(
            queue,
            config.reaper_interval,
            rx,
        )));

        tracing::info!(concurrency = config.concurrency, "Worker pool started");
        Self { shutdown, handles }
    }

    /// Signal every task to stop and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// Periodic safety net for crashed workers.
async fn run_reaper(queue: Arc<JobQueue>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match queue.reclaim_expired_leases().await {
                    Ok(0) => {}
                    Ok(n) => tracing::warn!(reclaimed = n, "Reaper requeued expired leases"),
                    Err(e) => tracing::error!(error = %e, "Lease reaper pass failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
    }
}
