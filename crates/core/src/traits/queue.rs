use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// A message handed out by a queue, pending until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend-specific delivery tag.
    pub tag: u64,
    /// Raw message body.
    pub payload: Bytes,
}

/// Minimal broker contract: enqueue, consume, acknowledge, dead-letter.
///
/// A delivery that is never acknowledged stays pending in the broker.
/// A rejected delivery is parked on a dead-letter list and never redelivered.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Name of the underlying queue.
    fn name(&self) -> &str;

    /// Append a message to the queue.
    async fn enqueue(&self, payload: Bytes) -> Result<()>;

    /// Wait for the next message. `None` means the queue is closed.
    async fn next_delivery(&self) -> Result<Option<Delivery>>;

    /// Remove a delivered message from the queue for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Move a delivered message to the dead-letter list without acknowledging it.
    async fn reject(&self, delivery: &Delivery) -> Result<()>;
}
