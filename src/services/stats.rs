use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::batch::BatchStatus;
use crate::services::queue::{JobQueue, QueueError};

/// Queue-wide job counts for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub dead_lettered: i64,
    pub cancelled: i64,
}

/// Read-only view over the queue.
pub struct StatusService {
    queue: Arc<JobQueue>,
}

impl StatusService {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        let counts = self.queue.queue_counts().await?;
        Ok(QueueStats {
            total: counts.total(),
            pending: counts.pending,
            in_progress: counts.in_progress,
            completed: counts.completed,
            dead_lettered: counts.failed,
            cancelled: counts.cancelled,
        })
    }

    pub async fn batch_status(&self, batch_id: Uuid) -> Result<BatchStatus, QueueError> {
        self.queue.get_batch_status(batch_id).await
    }
}
