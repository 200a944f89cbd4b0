use crate::events::PipelineEvent;

/// Receiver of pipeline events.
///
/// Publishing must never block the caller; implementations deliver
/// best-effort.
pub trait EventSink: Send + Sync {
    /// Publish an event to every current observer.
    fn publish(&self, event: PipelineEvent);
}
