//! Concurrency Gate
//!
//! Bounds simultaneous outbound provider calls. Admission is FIFO: tokio's
//! semaphore queues waiters in arrival order and hands a released permit to
//! the longest waiter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Fixed-capacity admission gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` holders (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a permit. The gate never rejects, it only delays.
    ///
    /// The only error is a closed semaphore, which this type never does.
    pub async fn admit(&self) -> Result<GatePermit> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let waiting = WaitingGuard(&self.waiting);

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("Concurrency gate closed: {}", e)))?;
        drop(waiting);

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(GatePermit {
            _permit: permit,
            active: self.active.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Permits free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Callers suspended in `admit`
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Decrements the waiting count even if the `admit` future is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Right to perform one admitted call. Dropping it releases the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_admits_up_to_capacity() {
        let gate = ConcurrencyGate::new(2);

        let a = gate.admit().await.unwrap();
        let _b = gate.admit().await.unwrap();
        assert_eq!(gate.active(), 2);
        assert_eq!(gate.available(), 0);

        let mut third = task::spawn(gate.admit());
        assert_pending!(third.poll());
        assert_eq!(gate.waiting(), 1);
        assert_eq!(gate.active(), 2);

        drop(a);
        assert!(third.is_woken());
        let _c = assert_ready!(third.poll()).unwrap();
        assert_eq!(gate.active(), 2);
        assert_eq!(gate.waiting(), 0);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_arrival_order() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.admit().await.unwrap();

        let mut first = task::spawn(gate.admit());
        let mut second = task::spawn(gate.admit());
        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert_eq!(gate.waiting(), 2);

        // One release admits exactly one waiter, the earliest.
        drop(held);
        assert_pending!(second.poll());
        let first_permit = assert_ready!(first.poll()).unwrap();
        assert_eq!(gate.active(), 1);

        drop(first_permit);
        let _second_permit = assert_ready!(second.poll()).unwrap();
        assert_eq!(gate.active(), 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_queue() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.admit().await.unwrap();

        let mut waiter = task::spawn(gate.admit());
        assert_pending!(waiter.poll());
        assert_eq!(gate.waiting(), 1);

        drop(waiter);
        assert_eq!(gate.waiting(), 0);

        drop(held);
        assert_eq!(gate.active(), 0);
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyGate::new(0).capacity(), 1);
    }
}
