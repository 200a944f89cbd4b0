//! In-memory job queue.
//!
//! Single-process stand-in for a broker. Deliveries move from the pending
//! list into an unacknowledged map until they are acked or rejected.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use launchpad_core::{
    traits::{Delivery, JobQueue},
    Error, Result,
};

/// In-memory queue with broker-like acknowledgment.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    pending: Mutex<VecDeque<Delivery>>,
    /// Delivered but not yet acknowledged, by tag.
    unacked: DashMap<u64, Delivery>,
    dead: Mutex<Vec<Delivery>>,
    next_tag: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl InMemoryJobQueue {
    /// Create a new in-memory queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: Mutex::new(VecDeque::new()),
            unacked: DashMap::new(),
            dead: Mutex::new(Vec::new()),
            next_tag: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Messages waiting to be delivered.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Messages delivered but not acknowledged.
    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Rejected messages, oldest first.
    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.dead.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Stop handing out deliveries. Consumers get `None` once drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn pop(&self) -> Result<Option<Delivery>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| Error::queue("queue mutex poisoned"))?;
        Ok(pending.pop_front())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, payload: Bytes) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::queue(format!("queue '{}' is closed", self.name)));
        }
        let delivery = Delivery {
            tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
            payload,
        };
        self.pending
            .lock()
            .map_err(|_| Error::queue("queue mutex poisoned"))?
            .push_back(delivery);
        self.notify.notify_one();
        Ok(())
    }

    async fn next_delivery(&self) -> Result<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.pop()? {
                self.unacked.insert(delivery.tag, delivery.clone());
                return Ok(Some(delivery));
            }
            if self.closed.load(Ordering::SeqCst) {
                // Let any other waiting consumer observe the close too.
                self.notify.notify_one();
                return Ok(None);
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.unacked
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or_else(|| Error::queue(format!("unknown delivery tag {}", delivery.tag)))
    }

    async fn reject(&self, delivery: &Delivery) -> Result<()> {
        let (_, delivery) = self
            .unacked
            .remove(&delivery.tag)
            .ok_or_else(|| Error::queue(format!("unknown delivery tag {}", delivery.tag)))?;
        self.dead
            .lock()
            .map_err(|_| Error::queue("queue mutex poisoned"))?
            .push(delivery);
        Ok(())
    }
}
