//! Mock implementations of core traits for testing.

use std::sync::Mutex;

use crate::{events::PipelineEvent, traits::EventSink};

// =============================================================================
// Recording Sink
// =============================================================================

/// Event sink that remembers everything published to it.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far, in publish order.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events of one kind (`"tunnel"`, `"logs"`, ...).
    pub fn of_kind(&self, kind: &str) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    /// All `logs` payloads joined together.
    pub fn log_text(&self) -> String {
        self.of_kind("logs")
            .iter()
            .map(|e| e.message().to_string())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}
