//! Work queue contract for asynchronous activities.

use crate::ids::{FlowLabel, InstanceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A scheduled asynchronous activity waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AsyncJob {
    /// Flow the instance belongs to.
    pub flow_label: FlowLabel,
    /// The scheduled instance.
    pub instance_id: InstanceId,
}

/// Error returned when a job cannot be handed to the queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct QueueError(pub String);

/// A transport that eventually hands every job to a worker.
///
/// Delivery may happen more than once. The engine rejects repeated runs of the
/// same instance through its compare-and-swap transitions, so queues do not
/// need to deduplicate.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Hands a job to the queue.
    ///
    /// Must not wait for a worker to take jobs off the queue. The engine
    /// records a refused job as a failed instance that can be retried.
    async fn enqueue(&self, job: AsyncJob) -> Result<(), QueueError>;
}
