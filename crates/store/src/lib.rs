#![deny(unused)]
//! Job queue backends.
//!
//! - [`InMemoryJobQueue`]: single-process queue for development and tests.
//! - [`RedisJobQueue`]: durable queue shared between the gateway and workers.

pub mod memory;
pub mod redis;

pub use memory::InMemoryJobQueue;
pub use redis::RedisJobQueue;

use std::sync::Arc;

use launchpad_core::{
    config::{QueueBackend, QueueConfig},
    traits::JobQueue,
    Result,
};

/// Build the configured queue backend.
///
/// For Redis, entries a previous consumer left unacknowledged are requeued first.
pub async fn connect(config: &QueueConfig) -> Result<Arc<dyn JobQueue>> {
    match config.backend {
        QueueBackend::Memory => {
            tracing::info!(queue = %config.name, "Using in-memory job queue");
            Ok(Arc::new(InMemoryJobQueue::new(config.name.clone())))
        }
        QueueBackend::Redis => {
            let queue = RedisJobQueue::new(&config.url, &config.name)?;
            queue.requeue_unacked().await?;
            tracing::info!(queue = %config.name, url = %config.url, "Using Redis job queue");
            Ok(Arc::new(queue))
        }
    }
}
