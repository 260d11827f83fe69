use std::sync::Arc;

use crate::db::store::QueueStore;
use crate::services::{
    dead_letter::DeadLetterStore,
    events::{EventSink, RedisEventSink},
    queue::JobQueue,
    stats::StatusService,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QueueStore>,
    pub queue: Arc<JobQueue>,
    pub dead_letters: Arc<DeadLetterStore>,
    pub status: Arc<StatusService>,
    /// Present when events are streamed to Redis; used by health checks.
    pub redis_events: Option<Arc<RedisEventSink>>,
}

impl AppState {
    pub fn new(
        queue: JobQueue,
        dead_letter_retry_cap: usize,
        redis_events: Option<Arc<RedisEventSink>>,
    ) -> Self {
        let queue = Arc::new(queue);
        Self {
            store: queue.store().clone(),
            dead_letters: Arc::new(DeadLetterStore::new(queue.clone(), dead_letter_retry_cap)),
            status: Arc::new(StatusService::new(queue.clone())),
            queue,
            redis_events,
        }
    }
}

/// Pick the event sink: Redis stream when configured, structured log otherwise.
pub fn event_sink(redis: Option<&Arc<RedisEventSink>>) -> Arc<dyn EventSink> {
    match redis {
        Some(sink) => sink.clone() as Arc<dyn EventSink>,
        None => Arc::new(crate::services::events::TracingEventSink) as Arc<dyn EventSink>,
    }
}
