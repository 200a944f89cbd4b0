//! Event broadcast hub.
//!
//! Registry of live observers. Each observer owns a bounded channel and
//! `publish` never waits on it: an observer whose buffer is full, or whose
//! receiving end is gone, is pruned on the spot. A pruned observer still
//! drains what was buffered, then its stream ends.

use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::events::PipelineEvent;
use crate::traits::EventSink;

/// Events buffered per observer before it counts as stalled.
pub const OBSERVER_BUFFER: usize = 256;

/// Identifier of one subscribed observer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObserverId(pub String);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Observer {
    id: ObserverId,
    tx: mpsc::Sender<PipelineEvent>,
}

type Registry = Mutex<Vec<Observer>>;

fn lock(registry: &Registry) -> MutexGuard<'_, Vec<Observer>> {
    registry.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Observer registry mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Fans pipeline events out to every subscribed observer, in subscription order.
#[derive(Clone)]
pub struct EventHub {
    observers: Arc<Registry>,
    capacity: usize,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::with_capacity(OBSERVER_BUFFER)
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub whose observers each buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new observer.
    ///
    /// The `connection` event is queued before the observer becomes visible
    /// to `publish`, so it is always the first event the observer sees.
    pub fn subscribe(&self) -> Subscription {
        let id = ObserverId(uuid::Uuid::new_v4().to_string());
        let (tx, rx) = mpsc::channel(self.capacity);
        let _ = tx.try_send(PipelineEvent::connection());

        let count = {
            let mut observers = lock(&self.observers);
            observers.push(Observer { id: id.clone(), tx });
            observers.len()
        };
        metrics::gauge!("launchpad_observers").set(count as f64);
        tracing::debug!(observer = %id, observers = count, "Observer subscribed");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.observers),
        }
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &ObserverId) {
        remove(&self.observers, id);
    }

    /// Number of currently subscribed observers.
    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Deliver an event to every current observer.
    pub fn broadcast(&self, event: PipelineEvent) {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|observer| match observer.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(observer = %observer.id, "Dropping stalled observer");
                metrics::counter!("launchpad_observers_dropped_total", "reason" => "stalled")
                    .increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(observer = %observer.id, "Dropping disconnected observer");
                false
            }
        });
        let after = observers.len();
        drop(observers);

        metrics::counter!("launchpad_events_published_total", "kind" => event.kind()).increment(1);
        if after != before {
            metrics::gauge!("launchpad_observers").set(after as f64);
        }
    }
}

impl EventSink for EventHub {
    fn publish(&self, event: PipelineEvent) {
        self.broadcast(event);
    }
}

fn remove(registry: &Registry, id: &ObserverId) {
    let remaining = {
        let mut observers = lock(registry);
        observers.retain(|observer| &observer.id != id);
        observers.len()
    };
    metrics::gauge!("launchpad_observers").set(remaining as f64);
    tracing::debug!(observer = %id, observers = remaining, "Observer unsubscribed");
}

/// Receiving side of one observer. Unsubscribes itself when dropped.
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::Receiver<PipelineEvent>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> &ObserverId {
        &self.id
    }

    /// Next event, or `None` once the hub is gone or has dropped this observer.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            remove(&registry, &self.id);
        }
    }
}
