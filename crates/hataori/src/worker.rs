//! Channel-backed work queue and the worker that drains it.

use crate::config::EngineConfig;
use crate::engine::Engine;
use async_trait::async_trait;
use hataori_core::{ActivityInstance, AsyncJob, FlowError, ProcessStore, QueueError, WorkQueue};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// [`WorkQueue`] backed by a bounded tokio channel.
///
/// Enqueueing never waits for room: a full channel is reported as a
/// [`QueueError`], since the worker draining it may be the caller.
/// Created together with the receiving end, which is handed to an
/// [`AsyncWorker`].
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: mpsc::Sender<AsyncJob>,
}

impl ChannelQueue {
    /// Creates a queue and its receiving end.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AsyncJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Creates a queue sized by [`EngineConfig::queue_capacity`].
    pub fn from_config(config: &EngineConfig) -> (Self, mpsc::Receiver<AsyncJob>) {
        Self::new(config.queue_capacity)
    }
}

#[async_trait]
impl WorkQueue for ChannelQueue {
    async fn enqueue(&self, job: AsyncJob) -> Result<(), QueueError> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => QueueError(format!(
                "Worker channel full, dropped job for instance {}",
                job.instance_id
            )),
            TrySendError::Closed(_) => QueueError("Worker channel closed".to_string()),
        })
    }
}

/// What happened to a single delivered job.
#[derive(Debug)]
pub enum JobOutcome {
    /// The callback ran; the instance is done or in error.
    Completed(ActivityInstance),
    /// The instance had already been picked up or changed; nothing ran.
    Duplicate(FlowError),
    /// The job could not be processed.
    Failed(FlowError),
}

/// Runs async activities delivered through a [`ChannelQueue`].
pub struct AsyncWorker<S> {
    engine: Arc<Engine<S>>,
    jobs: mpsc::Receiver<AsyncJob>,
}

impl<S: ProcessStore> AsyncWorker<S> {
    /// Creates a worker for the engine.
    pub fn new(engine: Arc<Engine<S>>, jobs: mpsc::Receiver<AsyncJob>) -> Self {
        Self { engine, jobs }
    }

    /// Processes jobs until every sender is dropped.
    pub async fn run(mut self) {
        info!("Async worker started");
        while let Some(job) = self.jobs.recv().await {
            self.handle(job).await;
        }
        info!("Async worker stopped");
    }

    /// Processes every job already queued, including jobs enqueued while
    /// draining, and returns their outcomes.
    pub async fn drain(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(job) = self.jobs.try_recv() {
            outcomes.push(self.handle(job).await);
        }
        outcomes
    }

    /// Processes one job.
    pub async fn handle(&self, job: AsyncJob) -> JobOutcome {
        match self
            .engine
            .run_async(job.flow_label.as_str(), job.instance_id)
            .await
        {
            Ok(instance) => {
                debug!(
                    "Async activity '{}' ({}) ended as {}",
                    instance.activity_name, instance.id, instance.status
                );
                JobOutcome::Completed(instance)
            }
            Err(error) if error.is_contention() => {
                warn!(
                    "Ignoring repeated delivery of instance {}: {}",
                    job.instance_id, error
                );
                JobOutcome::Duplicate(error)
            }
            Err(error) => {
                warn!("Async job for instance {} failed: {}", job.instance_id, error);
                JobOutcome::Failed(error)
            }
        }
    }
}
