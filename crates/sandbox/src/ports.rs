//! Host port pool.
//!
//! A fixed range `[start, start + capacity)` of host ports. Leases hand out the
//! lowest free port and give it back when the lease is released or dropped, so
//! a port can never be returned twice.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use launchpad_core::{Error, Result};

type Pool = Mutex<BTreeSet<u16>>;

fn lock(pool: &Pool) -> MutexGuard<'_, BTreeSet<u16>> {
    pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pool of host-facing ports.
#[derive(Clone)]
pub struct PortAllocator {
    pool: Arc<Pool>,
    start: u16,
    capacity: u16,
}

impl PortAllocator {
    /// Create a pool holding `capacity` consecutive ports from `start`.
    ///
    /// Ports that would overflow `u16` are left out.
    pub fn new(start: u16, capacity: u16) -> Self {
        let ports: BTreeSet<u16> = (0..capacity)
            .filter_map(|offset| start.checked_add(offset))
            .collect();
        let allocator = Self {
            capacity: ports.len() as u16,
            pool: Arc::new(Mutex::new(ports)),
            start,
        };
        allocator.report();
        allocator
    }

    /// Take the lowest free port.
    ///
    /// Fails with `PortsExhausted` when every port is leased; never waits.
    pub fn lease(&self) -> Result<PortLease> {
        let port = lock(&self.pool).pop_first().ok_or(Error::PortsExhausted)?;
        self.report();
        tracing::debug!(port, available = self.available(), "Port leased");
        Ok(PortLease {
            port,
            pool: Arc::clone(&self.pool),
        })
    }

    /// Number of ports currently free.
    pub fn available(&self) -> usize {
        lock(&self.pool).len()
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    fn report(&self) {
        metrics::gauge!("launchpad_ports_available").set(self.available() as f64);
    }
}

/// Exclusive ownership of one port. Returns the port to the pool on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    pool: Arc<Pool>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Give the port back now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        let available = {
            let mut pool = lock(&self.pool);
            pool.insert(self.port);
            pool.len()
        };
        metrics::gauge!("launchpad_ports_available").set(available as f64);
        tracing::debug!(port = self.port, available, "Port released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_leases_lowest_first() {
        let ports = PortAllocator::new(3005, 3);
        let a = ports.lease().unwrap();
        let b = ports.lease().unwrap();
        assert_eq!(a.port(), 3005);
        assert_eq!(b.port(), 3006);
        assert_eq!(ports.available(), 1);
    }

    #[test]
    fn test_outstanding_leases_are_distinct() {
        let ports = PortAllocator::new(4000, 50);
        let leases: Vec<_> = (0..50).map(|_| ports.lease().unwrap()).collect();
        let unique: HashSet<u16> = leases.iter().map(|l| l.port()).collect();
        assert_eq!(unique.len(), 50);
        assert!(unique.iter().all(|p| (4000..4050).contains(p)));
    }

    #[test]
    fn test_exhaustion_does_not_block() {
        let ports = PortAllocator::new(3005, 1);
        let held = ports.lease().unwrap();
        assert!(matches!(ports.lease(), Err(Error::PortsExhausted)));

        held.release();
        let again = ports.lease().unwrap();
        assert_eq!(again.port(), 3005);
    }

    #[test]
    fn test_drop_returns_port() {
        let ports = PortAllocator::new(3005, 2);
        {
            let _a = ports.lease().unwrap();
            let _b = ports.lease().unwrap();
            assert_eq!(ports.available(), 0);
        }
        assert_eq!(ports.available(), 2);
        assert_eq!(ports.lease().unwrap().port(), 3005);
    }

    #[test]
    fn test_range_clamped_at_u16_max() {
        let ports = PortAllocator::new(65534, 5);
        assert_eq!(ports.capacity(), 2);
        assert_eq!(ports.available(), 2);
    }
}
