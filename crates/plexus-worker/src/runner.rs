//! Worker runner: the loop that polls queues and executes runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use plexus_core::config::worker::WorkerConfig;
use plexus_core::traits::task_queue::TaskQueue;

use crate::executor::TaskExecutor;

/// Main worker runner that polls queues and executes runs
#[derive(Debug)]
pub struct WorkerRunner {
    /// Task queue for polling
    queue: Arc<dyn TaskQueue>,
    /// Executor for isolated runs
    executor: Arc<TaskExecutor>,
    /// Worker configuration
    config: WorkerConfig,
    /// Worker identifier
    worker_id: String,
    /// Queues to poll (in priority order)
    queues: Vec<String>,
}

impl WorkerRunner {
    /// Create a new worker runner polling the configured queues
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        executor: Arc<TaskExecutor>,
        config: WorkerConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        let queues = config.queues.clone();
        Self {
            queue,
            executor,
            config,
            worker_id: worker_id.into(),
            queues,
        }
    }

    /// Set the queues to poll
    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    /// Start the worker runner. Runs until the cancel signal is received,
    /// then waits up to the shutdown grace period for in-flight runs.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        info!(
            worker = %self.worker_id,
            concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            queues = ?self.queues,
            "Worker started"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        while !*cancel.borrow() {
            let permit = tokio::select! {
                _ = cancel.changed() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Not raced against cancel: a popped run must reach the executor.
            let dispatched = self.dispatch_next(permit).await;

            if !dispatched {
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = time::sleep(poll_interval) => {}
                }
            }
        }

        info!(worker = %self.worker_id, "Worker waiting for in-flight runs to complete");

        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        if time::timeout(grace, semaphore.acquire_many(concurrency as u32))
            .await
            .is_err()
        {
            warn!(
                worker = %self.worker_id,
                grace_secs = grace.as_secs(),
                "In-flight runs did not finish within the grace period"
            );
        }

        info!(worker = %self.worker_id, "Worker shut down complete");
    }

    /// Dequeue and spawn one run on the slot held by `permit`. Returns
    /// whether a run was dispatched.
    async fn dispatch_next(&self, permit: OwnedSemaphorePermit) -> bool {
        match self.queue.dequeue(&self.queues).await {
            Ok(Some(run)) => {
                let executor = Arc::clone(&self.executor);
                debug!(
                    worker = %self.worker_id,
                    task = %run.task,
                    run_id = %run.run_id,
                    queue = %run.queue,
                    "Dispatching run"
                );
                tokio::spawn(async move {
                    let _permit = permit;
                    executor.execute(run).await;
                });
                true
            }
            Ok(None) => {
                trace!("No runs available in queues");
                false
            }
            Err(e) => {
                error!(worker = %self.worker_id, error = %e, "Failed to dequeue run");
                false
            }
        }
    }
}
