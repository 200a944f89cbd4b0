//! Single-slot concurrency gate for job processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use launchpad_core::{Error, Result};

/// At most one job holds the gate at a time.
///
/// The intake loop holds the slot from before it pulls a delivery until the
/// job is done, and marks the job in flight only once a delivery arrived.
/// The gateway reports that mark as `busy`.
#[derive(Clone)]
pub struct IntakeGate {
    slot: Arc<Semaphore>,
    in_flight: Arc<AtomicBool>,
}

impl Default for IntakeGate {
    fn default() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Marks a job in flight until dropped.
pub struct InFlight {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl IntakeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no job is in flight and take the slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("intake gate closed"))
    }

    /// Whether the slot is taken, including while waiting for a delivery.
    pub fn is_held(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Mark a job in flight; call while holding the slot.
    pub fn begin_job(&self) -> InFlight {
        self.in_flight.store(true, Ordering::SeqCst);
        InFlight {
            flag: self.in_flight.clone(),
        }
    }

    /// Whether a job is currently being processed.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Refuse further acquisitions; pending waiters fail.
    pub fn close(&self) {
        self.slot.close();
    }
}
