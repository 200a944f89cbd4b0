//! Redis implementation of JobQueue.
//!
//! Reliable-queue pattern: producers `LPUSH` onto the queue list, consumers
//! `BLMOVE` the oldest entry into `<name>:processing` and `LREM` it on ack.
//! Rejected entries move from the processing list to `<name>:dead`.
//! Entries left in the processing list by a crashed consumer are pushed back
//! with [`RedisJobQueue::requeue_unacked`].

use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Direction};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use launchpad_core::{
    traits::{Delivery, JobQueue},
    Error, Result,
};

/// Redis-backed job queue.
pub struct RedisJobQueue {
    client: Client,
    name: String,
    processing: String,
    dead: String,
    next_tag: AtomicU64,
    block_timeout: Duration,
    closed: AtomicBool,
}

impl RedisJobQueue {
    /// Create a new Redis job queue.
    pub fn new(url: &str, name: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::queue(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            name: name.to_string(),
            processing: format!("{}:processing", name),
            dead: format!("{}:dead", name),
            next_tag: AtomicU64::new(1),
            block_timeout: Duration::from_secs(5),
            closed: AtomicBool::new(false),
        })
    }

    /// How long one blocking pop waits before re-checking for shutdown.
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Make consumers return `None` after their current wait.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::queue(format!("Redis connection error: {}", e)))
    }

    /// Move every unacknowledged entry back to the consumer end of the queue,
    /// oldest nearest, so they are redelivered first and in their original
    /// order. Returns how many were moved.
    pub async fn requeue_unacked(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            // The processing list holds the newest delivery on its left.
            let entry: Option<Vec<u8>> = conn
                .lmove(&self.processing, &self.name, Direction::Left, Direction::Right)
                .await
                .map_err(|e| Error::queue(format!("Redis lmove error: {}", e)))?;
            match entry {
                Some(_) => moved += 1,
                None => break,
            }
        }
        if moved > 0 {
            tracing::info!(queue = %self.name, requeued = moved, "Requeued unacknowledged jobs");
        }
        Ok(moved)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, payload: Bytes) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .lpush(&self.name, payload.as_ref())
            .await
            .map_err(|e| Error::queue(format!("Redis lpush error: {}", e)))?;
        Ok(())
    }

    async fn next_delivery(&self) -> Result<Option<Delivery>> {
        let mut conn = self.connection().await?;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let entry: Option<Vec<u8>> = conn
                .blmove(
                    &self.name,
                    &self.processing,
                    Direction::Right,
                    Direction::Left,
                    self.block_timeout.as_secs_f64(),
                )
                .await
                .map_err(|e| Error::queue(format!("Redis blmove error: {}", e)))?;

            if let Some(payload) = entry {
                return Ok(Some(Delivery {
                    tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
                    payload: Bytes::from(payload),
                }));
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.connection().await?;
        let removed: usize = conn
            .lrem(&self.processing, 1, delivery.payload.as_ref())
            .await
            .map_err(|e| Error::queue(format!("Redis lrem error: {}", e)))?;
        if removed == 0 {
            return Err(Error::queue(format!(
                "delivery {} not found in {}",
                delivery.tag, self.processing
            )));
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.connection().await?;
        let (removed, _): (usize, usize) = redis::pipe()
            .atomic()
            .lrem(&self.processing, 1, delivery.payload.as_ref())
            .lpush(&self.dead, delivery.payload.as_ref())
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::queue(format!("Redis dead-letter error: {}", e)))?;
        if removed == 0 {
            tracing::warn!(
                tag = delivery.tag,
                processing = %self.processing,
                "Rejected delivery was not in the processing list"
            );
        }
        tracing::warn!(tag = delivery.tag, dead = %self.dead, "Delivery dead-lettered");
        Ok(())
    }
}
