use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::circuit::BreakerState;
use crate::models::error::ErrorKind;

const EVENT_STREAM_KEY: &str = "marketplace_sync:events";
const EVENT_STREAM_MAXLEN: usize = 100_000;

/// Structured audit record emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    BatchSubmitted {
        batch_id: Uuid,
        platform: String,
        total_jobs: usize,
    },
    BatchCancelled {
        batch_id: Uuid,
        cancelled: u64,
    },
    JobClaimed {
        job_id: Uuid,
        worker_id: String,
        attempts: i32,
    },
    JobCompleted {
        job_id: Uuid,
        worker_id: String,
    },
    JobRetryScheduled {
        job_id: Uuid,
        attempts: i32,
        error_kind: ErrorKind,
        scheduled_at: DateTime<Utc>,
    },
    JobDeadLettered {
        job_id: Uuid,
        entry_id: Uuid,
        attempts: i32,
        error_kind: ErrorKind,
    },
    JobDeferred {
        job_id: Uuid,
        scheduled_at: DateTime<Utc>,
    },
    LeaseReclaimed {
        job_id: Uuid,
        previous_owner: Option<String>,
    },
    CircuitTransition {
        key: String,
        from: BreakerState,
        to: BreakerState,
    },
    DeadLettersRetried {
        retried: usize,
        failed: usize,
    },
    DeadLettersCleaned {
        older_than_days: i64,
        removed: u64,
    },
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::BatchSubmitted { .. } => "batch_submitted",
            QueueEvent::BatchCancelled { .. } => "batch_cancelled",
            QueueEvent::JobClaimed { .. } => "job_claimed",
            QueueEvent::JobCompleted { .. } => "job_completed",
            QueueEvent::JobRetryScheduled { .. } => "job_retry_scheduled",
            QueueEvent::JobDeadLettered { .. } => "job_dead_lettered",
            QueueEvent::JobDeferred { .. } => "job_deferred",
            QueueEvent::LeaseReclaimed { .. } => "lease_reclaimed",
            QueueEvent::CircuitTransition { .. } => "circuit_transition",
            QueueEvent::DeadLettersRetried { .. } => "dead_letters_retried",
            QueueEvent::DeadLettersCleaned { .. } => "dead_letters_cleaned",
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &QueueEvent) -> Result<(), EventSinkError>;
}

/// Emit to a sink, logging instead of failing the caller.
pub async fn publish(sink: &dyn EventSink, event: QueueEvent) {
    if let Err(e) = sink.emit(&event).await {
        tracing::warn!(event = event.name(), error = %e, "Failed to emit queue event");
    }
}

/// Writes events into the structured log.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: &QueueEvent) -> Result<(), EventSinkError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(target: "marketplace_sync::audit", event = event.name(), payload = %payload);
        Ok(())
    }
}

/// Appends events to a capped Redis stream.
pub struct RedisEventSink {
    client: redis::Client,
}

impl RedisEventSink {
    pub fn new(redis_url: &str) -> Result<Self, EventSinkError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), EventSinkError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn emit(&self, event: &QueueEvent) -> Result<(), EventSinkError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;
        conn.xadd_maxlen::<_, _, _, _, ()>(
            EVENT_STREAM_KEY,
            redis::streams::StreamMaxlen::Approx(EVENT_STREAM_MAXLEN),
            "*",
            &[("event", event.name()), ("payload", payload.as_str())],
        )
        .await?;
        Ok(())
    }
}

/// Keeps every event in memory. Used by tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: parking_lot::Mutex<Vec<QueueEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, event: &QueueEvent) -> Result<(), EventSinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventSinkError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
