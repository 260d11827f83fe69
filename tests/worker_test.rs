mod helpers;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use marketplace_sync::{
    models::{circuit::BreakerState, error::ErrorKind, job::JobStatus},
    services::{
        circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
        classifier::RawError,
        events::QueueEvent,
        retry::RetryPolicy,
        worker::{Worker, WorkerConfig, WorkerPool},
    },
};

use helpers::{assert_conserved, items, Harness, ScriptedAdapter, LEASE};

fn fast_config(in_call_attempts: u32) -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(5),
        lease_duration: LEASE,
        reaper_interval: Duration::from_millis(50),
        retry: RetryPolicy {
            max_attempts: in_call_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        },
    }
}

fn breaker(failure_threshold: u32) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout: Duration::from_secs(60),
    }))
}

fn worker(h: &Harness, breaker: Arc<CircuitBreaker>, adapter: Arc<ScriptedAdapter>, retries: u32) -> Worker {
    Worker::new("w1", h.queue.clone(), breaker, adapter, fast_config(retries))
}

#[tokio::test]
async fn test_idle_worker_reports_no_job() {
    let h = Harness::new();
    let adapter = Arc::new(ScriptedAdapter::succeeding());
    let worker = worker(&h, breaker(5), adapter.clone(), 3);

    assert!(!worker.process_next_job().await.unwrap());
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn test_successful_call_completes_job() {
    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("shopee", items(1), None).await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::succeeding());
    let worker = worker(&h, breaker(5), adapter.clone(), 3);

    assert!(worker.process_next_job().await.unwrap());

    assert_eq!(adapter.calls(), 1);
    let status = h.status(batch_id).await;
    assert_eq!(status.completed, 1);
    assert_conserved(&status);
}

#[tokio::test]
async fn test_transient_failure_is_retried_in_call() {
    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("shopee", items(1), None).await.unwrap();
    let adapter = Arc::new(
        ScriptedAdapter::succeeding().then(Err(RawError::with_status(503, "maintenance"))),
    );
    let worker = worker(&h, breaker(5), adapter.clone(), 3);

    assert!(worker.process_next_job().await.unwrap());

    assert_eq!(adapter.calls(), 2);
    let job = &h.store.jobs_in_batch(batch_id)[0];
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn test_exhausted_in_call_retries_reschedule_the_job() {
    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("shopee", items(1), None).await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::failing(RawError::with_status(
        503,
        "maintenance",
    )));
    let worker = worker(&h, breaker(5), adapter.clone(), 2);

    assert!(worker.process_next_job().await.unwrap());

    assert_eq!(adapter.calls(), 2);
    let job = &h.store.jobs_in_batch(batch_id)[0];
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.last_error.as_ref().unwrap().kind,
        ErrorKind::PlatformUnavailable
    );
}

#[tokio::test]
async fn test_non_retryable_failure_dead_letters_after_one_call() {
    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("shopee", items(1), Some(3)).await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::failing(RawError::with_status(
        400,
        "invalid category",
    )));
    let worker = worker(&h, breaker(5), adapter.clone(), 3);

    assert!(worker.process_next_job().await.unwrap());

    assert_eq!(adapter.calls(), 1);
    let job = &h.store.jobs_in_batch(batch_id)[0];
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert_eq!(job.attempts, 1);
    assert_eq!(h.store.dead_letters().len(), 1);
}

#[tokio::test]
async fn test_open_circuit_defers_jobs_without_calling_platform() {
    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("shopee", items(2), None).await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::failing(RawError::with_status(
        502,
        "bad gateway",
    )));
    let breaker = breaker(1);
    let worker = worker(&h, breaker.clone(), adapter.clone(), 1);

    assert!(worker.process_next_job().await.unwrap());
    assert_eq!(breaker.get_state("shopee").state, BreakerState::Open);

    assert!(worker.process_next_job().await.unwrap());
    assert_eq!(adapter.calls(), 1);

    let jobs = h.store.jobs_in_batch(batch_id);
    let failed = jobs.iter().find(|j| j.attempts == 1).unwrap();
    let deferred = jobs.iter().find(|j| j.attempts == 0).unwrap();
    assert!(failed.last_error.is_some());
    assert_eq!(deferred.status, JobStatus::Pending);
    assert!(deferred.last_error.is_none());
    assert!(deferred.scheduled_at > h.queue.now());
    assert_conserved(&h.status(batch_id).await);
}

#[tokio::test(start_paused = true)]
async fn test_hung_platform_call_times_out_and_reschedules() {
    struct Hung;

    #[async_trait::async_trait]
    impl marketplace_sync::services::platform::PlatformAdapter for Hung {
        async fn perform_request(
            &self,
            _platform: &str,
            _payload: &serde_json::Value,
        ) -> Result<serde_json::Value, RawError> {
            futures::future::pending().await
        }
    }

    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("shopee", items(1), Some(3)).await.unwrap();
    let worker = Worker::new(
        "w1",
        h.queue.clone(),
        breaker(5),
        Arc::new(Hung),
        fast_config(1),
    );

    assert!(worker.process_next_job().await.unwrap());

    let job = &h.store.jobs_in_batch(batch_id)[0];
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert!(job.lease_owner.is_none());

    // Released by the failure path, not by lease expiry.
    let events = h.events.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, QueueEvent::JobRetryScheduled { attempts: 1, error_kind: ErrorKind::Timeout, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, QueueEvent::LeaseReclaimed { .. })));
}

#[tokio::test]
async fn test_adapter_sees_job_payload() {
    struct EchoCheck;

    #[async_trait::async_trait]
    impl marketplace_sync::services::platform::PlatformAdapter for EchoCheck {
        async fn perform_request(
            &self,
            platform: &str,
            payload: &serde_json::Value,
        ) -> Result<serde_json::Value, RawError> {
            if platform == "tokopedia" && payload["sku"] == "SKU-0" {
                Ok(json!({ "synced": true }))
            } else {
                Err(RawError::with_status(422, "unexpected payload"))
            }
        }
    }

    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("tokopedia", items(1), None).await.unwrap();
    let worker = Worker::new(
        "w1",
        h.queue.clone(),
        breaker(5),
        Arc::new(EchoCheck),
        fast_config(1),
    );

    assert!(worker.process_next_job().await.unwrap());
    assert_eq!(h.status(batch_id).await.completed, 1);
}

#[tokio::test]
async fn test_pool_drains_batch_and_shuts_down() {
    let h = Harness::new();
    let batch_id = h.queue.enqueue_batch("shopee", items(6), None).await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::succeeding());

    let pool = WorkerPool::start(
        h.queue.clone(),
        breaker(5),
        adapter.clone(),
        fast_config(3),
        "test",
    );

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.status(batch_id).await.is_complete() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    pool.shutdown().await;

    assert!(drained.is_ok(), "pool did not drain the batch");
    assert_eq!(adapter.calls(), 6);
    assert_eq!(h.status(batch_id).await.completed, 6);
}
