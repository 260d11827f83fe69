//! Shared fixtures for queue, dead-letter, worker and API tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use marketplace_sync::{
    db::memory::MemoryStore,
    models::{batch::BatchStatus, job::Job},
    services::{
        classifier::RawError,
        clock::ManualClock,
        dead_letter::DeadLetterStore,
        events::RecordingEventSink,
        platform::PlatformAdapter,
        queue::{JobQueue, QueueConfig},
        retry::RetryPolicy,
    },
};

pub const LEASE: Duration = Duration::from_secs(300);

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// Queue wired to in-memory collaborators the test can inspect and drive.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingEventSink>,
    pub queue: Arc<JobQueue>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_queue_config())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let events = Arc::new(RecordingEventSink::default());
        let queue = Arc::new(JobQueue::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            config,
        ));
        Self {
            store,
            clock,
            events,
            queue,
        }
    }

    pub fn dead_letters(&self, retry_cap: usize) -> DeadLetterStore {
        DeadLetterStore::new(self.queue.clone(), retry_cap)
    }

    /// Move past any backoff or suggested delay the queue could pick.
    pub fn skip_backoff(&self) {
        self.clock.advance(chrono::Duration::hours(1));
    }

    pub async fn job(&self, job_id: Uuid) -> Job {
        self.queue
            .get_job(job_id)
            .await
            .unwrap()
            .expect("job should exist")
    }

    pub async fn status(&self, batch_id: Uuid) -> BatchStatus {
        self.queue.get_batch_status(batch_id).await.unwrap()
    }
}

pub fn test_queue_config() -> QueueConfig {
    QueueConfig {
        default_max_attempts: 3,
        lease_duration: LEASE,
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

pub fn items(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({ "sku": format!("SKU-{i}") })).collect()
}

/// Conservation must hold whatever the queue has done to the batch.
pub fn assert_conserved(status: &BatchStatus) {
    assert_eq!(
        status.pending + status.in_progress + status.completed + status.failed + status.cancelled,
        status.total,
        "batch counts drifted: {status:?}"
    );
}

/// Adapter that replays scripted outcomes, then falls back to a default.
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<Value, RawError>>>,
    fallback: Result<Value, RawError>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(json!({ "ok": true })))
    }

    pub fn failing(error: RawError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: Result<Value, RawError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, outcome: Result<Value, RawError>) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    async fn perform_request(&self, _platform: &str, _payload: &Value) -> Result<Value, RawError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
