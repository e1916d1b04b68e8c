//! Reliable task queue over Redis lists.
//!
//! Producers LPUSH onto the main queue; the worker BLMOVEs from the queue
//! tail into a processing list and LREMs the entry only after the task
//! finishes. That gives late acknowledgement with an effective prefetch of
//! one: a worker that dies mid-task leaves the payload in the processing
//! list, and `recover` pushes stranded entries back onto the queue at
//! startup for redelivery. Tasks must therefore be idempotent.

use eyre::{Result, WrapErr};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction};
use tracing::debug;

use super::tasks::Task;

const QUEUE_KEY: &str = "shopyard:tasks";
const PROCESSING_KEY: &str = "shopyard:tasks:processing";
/// BLMOVE poll timeout; bounds shutdown latency
const POLL_TIMEOUT_SECS: f64 = 5.0;

/// A task payload pulled from the queue but not yet acknowledged
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: String,
}

#[derive(Clone)]
pub struct TaskQueue {
    conn: ConnectionManager,
}

impl TaskQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).wrap_err("Invalid redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .wrap_err("Failed to connect to redis")?;
        Ok(Self { conn })
    }

    /// Publish a task for the worker fleet.
    pub async fn enqueue(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_string(task).wrap_err("Failed to serialize task")?;
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lpush(QUEUE_KEY, &payload)
            .await
            .wrap_err("Failed to enqueue task")?;
        debug!(task = task.kind(), store_id = %task.store_id(), "task enqueued");
        Ok(())
    }

    /// Block for the next task, moving it into the processing list. `None`
    /// on poll timeout.
    pub async fn next(&self) -> Result<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .blmove(
                QUEUE_KEY,
                PROCESSING_KEY,
                Direction::Right,
                Direction::Left,
                POLL_TIMEOUT_SECS,
            )
            .await
            .wrap_err("Failed to poll task queue")?;
        Ok(payload.map(|payload| Delivery { payload }))
    }

    /// Late acknowledgement: drop the payload from the processing list.
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lrem(PROCESSING_KEY, 1, &delivery.payload)
            .await
            .wrap_err("Failed to acknowledge task")?;
        Ok(())
    }

    /// Move tasks stranded in the processing list (crashed worker) back
    /// onto the queue. Run before consuming.
    pub async fn recover(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut moved = 0usize;
        loop {
            let item: Option<String> = conn
                .lmove(PROCESSING_KEY, QUEUE_KEY, Direction::Left, Direction::Right)
                .await
                .wrap_err("Failed to recover in-flight tasks")?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }
}
