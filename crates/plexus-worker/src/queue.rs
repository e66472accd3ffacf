//! Task queue backends.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use plexus_core::config::worker::{TaskQueueBackend, WorkerConfig};
#[cfg(not(feature = "redis-backend"))]
use plexus_core::error::AppError;
use plexus_core::result::AppResult;
use plexus_core::traits::task_queue::{TaskQueue, TaskRun};

/// In-process FIFO queues, one per queue class.
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    queues: Mutex<HashMap<String, VecDeque<TaskRun>>>,
}

impl MemoryTaskQueue {
    /// Create empty queues.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, run: &TaskRun) -> AppResult<()> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(run.queue.clone())
            .or_default()
            .push_back(run.clone());
        debug!(task = %run.task, run_id = %run.run_id, queue = %run.queue, "Enqueued run");
        Ok(())
    }

    async fn dequeue(&self, queues: &[String]) -> AppResult<Option<TaskRun>> {
        let mut all = self.queues.lock().await;
        for queue in queues {
            if let Some(run) = all.get_mut(queue).and_then(VecDeque::pop_front) {
                debug!(task = %run.task, run_id = %run.run_id, queue = %queue, "Dequeued run");
                return Ok(Some(run));
            }
        }
        Ok(None)
    }

    async fn len(&self, queue: &str) -> AppResult<usize> {
        let all = self.queues.lock().await;
        Ok(all.get(queue).map_or(0, VecDeque::len))
    }
}

/// Redis lists: `LPUSH` on enqueue, `RPOP` across queue classes on dequeue.
///
/// A popped payload that does not decode is gone from the list; it is logged
/// with its queue, counted in [`RedisTaskQueue::discarded`] and skipped.
#[cfg(feature = "redis-backend")]
#[derive(Debug, Clone)]
pub struct RedisTaskQueue {
    client: plexus_bus::redis::RedisClient,
    discarded: Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(feature = "redis-backend")]
impl RedisTaskQueue {
    /// Create a queue on top of a connected client.
    pub fn new(client: plexus_bus::redis::RedisClient) -> Self {
        Self {
            client,
            discarded: Arc::default(),
        }
    }

    /// Runs popped off a queue but dropped because they did not decode.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn key(&self, queue: &str) -> String {
        plexus_bus::keys::task_queue(self.client.prefix(), queue)
    }

    fn map_err(e: redis::RedisError) -> plexus_core::error::AppError {
        plexus_core::error::AppError::with_source(
            plexus_core::error::ErrorKind::TaskQueue,
            format!("Redis error: {e}"),
            e,
        )
    }
}

#[cfg(feature = "redis-backend")]
#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, run: &TaskRun) -> AppResult<()> {
        use redis::AsyncCommands;

        let payload = serde_json::to_string(run)?;
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .lpush(self.key(&run.queue), payload)
            .await
            .map_err(Self::map_err)?;
        debug!(task = %run.task, run_id = %run.run_id, queue = %run.queue, "Enqueued run");
        Ok(())
    }

    async fn dequeue(&self, queues: &[String]) -> AppResult<Option<TaskRun>> {
        use redis::AsyncCommands;

        let mut conn = self.client.conn_mut();
        for queue in queues {
            loop {
                let raw: Option<String> = conn
                    .rpop(self.key(queue), None)
                    .await
                    .map_err(Self::map_err)?;
                let Some(raw) = raw else { break };
                if let Some(run) = decode_run(queue, &raw, &self.discarded) {
                    return Ok(Some(run));
                }
            }
        }
        Ok(None)
    }

    async fn len(&self, queue: &str) -> AppResult<usize> {
        use redis::AsyncCommands;

        let mut conn = self.client.conn_mut();
        let len: usize = conn.llen(self.key(queue)).await.map_err(Self::map_err)?;
        Ok(len)
    }
}

/// Decode a popped payload, counting and logging it when it is not a run.
#[cfg(feature = "redis-backend")]
fn decode_run(
    queue: &str,
    raw: &str,
    discarded: &std::sync::atomic::AtomicU64,
) -> Option<TaskRun> {
    match serde_json::from_str(raw) {
        Ok(run) => Some(run),
        Err(e) => {
            let total = discarded.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            error!(
                queue,
                error = %e,
                payload_bytes = raw.len(),
                discarded_total = total,
                "Discarding undecodable task run"
            );
            None
        }
    }
}

/// Build the task queue the configuration asks for.
pub async fn build_task_queue(config: &WorkerConfig) -> AppResult<Arc<dyn TaskQueue>> {
    let queue: Arc<dyn TaskQueue> = match config.backend {
        TaskQueueBackend::Memory => {
            info!("Initializing in-memory task queue");
            Arc::new(MemoryTaskQueue::new())
        }
        #[cfg(feature = "redis-backend")]
        TaskQueueBackend::Redis => {
            info!("Initializing Redis task queue");
            let client = plexus_bus::redis::RedisClient::connect(
                &config.redis,
                plexus_core::error::ErrorKind::TaskQueue,
            )
            .await?;
            Arc::new(RedisTaskQueue::new(client))
        }
        #[cfg(not(feature = "redis-backend"))]
        TaskQueueBackend::Redis => {
            return Err(AppError::configuration(
                "Task queue backend 'redis' requires the redis-backend feature",
            ));
        }
    };

    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::traits::task_queue::RunTrigger;

    fn run(task: &str, queue: &str) -> TaskRun {
        TaskRun::new(task, queue, serde_json::Value::Null, RunTrigger::Scheduled)
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let queue = MemoryTaskQueue::new();
        let first = run("ns.a.one", "default");
        let second = run("ns.a.two", "default");
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let queues = vec!["default".to_string()];
        assert_eq!(queue.dequeue(&queues).await.unwrap(), Some(first));
        assert_eq!(queue.dequeue(&queues).await.unwrap(), Some(second));
        assert_eq!(queue.dequeue(&queues).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_priority_order_across_queues() {
        let queue = MemoryTaskQueue::new();
        queue.enqueue(&run("ns.a.later", "default")).await.unwrap();
        queue.enqueue(&run("ns.core.first", "core")).await.unwrap();
        assert_eq!(queue.len("default").await.unwrap(), 1);

        let queues = vec!["core".to_string(), "default".to_string()];
        let next = queue.dequeue(&queues).await.unwrap().unwrap();
        assert_eq!(next.queue, "core");
    }

    #[cfg(feature = "redis-backend")]
    #[test]
    fn test_undecodable_run_is_counted_and_skipped() {
        let discarded = std::sync::atomic::AtomicU64::new(0);
        let valid = serde_json::to_string(&run("ns.a.job", "default")).unwrap();

        assert!(decode_run("default", "{not json", &discarded).is_none());
        assert!(decode_run("default", r#"{"task": 7}"#, &discarded).is_none());
        let decoded = decode_run("default", &valid, &discarded).unwrap();

        assert_eq!(decoded.task, "ns.a.job");
        assert_eq!(discarded.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_unpolled_queue_is_ignored() {
        let queue = MemoryTaskQueue::new();
        queue.enqueue(&run("ns.a.job", "push")).await.unwrap();
        assert!(
            queue
                .dequeue(&["default".to_string()])
                .await
                .unwrap()
                .is_none()
        );
    }
}
