//! Admission control independent of the scheduler's own ceiling.
//!
//! [`ConcurrencyGate`] is a counting semaphore: [`acquire`](ConcurrencyGate::acquire)
//! waits for a permit and hands back a [`GatePermit`] that returns it on drop. Since
//! release happens in `Drop`, a body that errors or panics while holding the permit
//! still gives it back.
//!
//! Waiting suspends the calling task only. Under the pooled strategy the task's
//! worker thread blocks with it, which is the point of that strategy.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::GateError;

struct GateInner {
    permits: Arc<Semaphore>,
    capacity: usize,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Cloning a gate yields another handle to the same permits.
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    /// Capacities above [`Semaphore::MAX_PERMITS`] are capped to it.
    pub fn new(capacity: usize) -> Result<Self, GateError> {
        if capacity == 0 {
            return Err(GateError::ZeroCapacity);
        }
        let capacity = capacity.min(Semaphore::MAX_PERMITS);
        Ok(Self {
            inner: Arc::new(GateInner {
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        })
    }

    /// Waits until a permit is free. Fails only if the gate is closed, before or
    /// during the wait; no permit is held in that case.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(GatePermit {
            _permit: permit,
            gate: Arc::clone(&self.inner),
        })
    }

    /// Like [`acquire`](Self::acquire) but gives up after `limit`.
    pub async fn acquire_timeout(&self, limit: Duration) -> Result<GatePermit, GateError> {
        tokio::time::timeout(limit, self.acquire())
            .await
            .map_err(|_| GateError::Timeout(limit))?
    }

    /// Fails every current and future waiter with [`GateError::Closed`].
    /// Permits already handed out stay valid until dropped.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits not currently held by anyone.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Number of successful acquisitions so far.
    pub fn acquired(&self) -> u64 {
        self.inner.acquired.load(Ordering::Relaxed)
    }

    /// Number of permits given back so far.
    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }

    /// Snapshot of the gate's counters.
    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity(),
            available: self.available(),
            acquired: self.acquired(),
            released: self.released(),
        }
    }
}

/// Counters of a [`ConcurrencyGate`] at one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub capacity: usize,
    pub available: usize,
    pub acquired: u64,
    pub released: u64,
}

impl GateStats {
    /// Every permit handed out came back and none are held.
    pub fn is_conserved(&self) -> bool {
        self.available == self.capacity && self.acquired == self.released
    }
}

impl fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A held permit; dropping it releases the permit to at most one waiter.
#[must_use = "the permit is released as soon as it is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    gate: Arc<GateInner>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.released.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tracker::ConcurrencyTracker;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(ConcurrencyGate::new(0).unwrap_err(), GateError::ZeroCapacity);
    }

    #[test]
    fn oversized_capacity_is_capped() {
        let gate = ConcurrencyGate::new(usize::MAX).unwrap();
        assert_eq!(gate.capacity(), Semaphore::MAX_PERMITS);
    }

    #[tokio::test]
    async fn dropping_permit_returns_it() {
        let gate = ConcurrencyGate::new(2).unwrap();
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        drop(a);
        assert_eq!(gate.available(), 1);
        drop(b);
        assert_eq!(gate.available(), 2);
        assert_eq!(gate.acquired(), 2);
        assert_eq!(gate.released(), 2);
    }

    #[tokio::test]
    async fn panic_inside_guarded_section_releases_permit() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let g = gate.clone();
        let res = tokio::spawn(async move {
            let _permit = g.acquire().await.unwrap();
            panic!("body failed while holding the permit");
        })
        .await;

        assert!(res.is_err());
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.acquired(), gate.released());
    }

    #[tokio::test]
    async fn close_fails_waiters_without_leaking() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let held = gate.acquire().await.unwrap();

        let g = gate.clone();
        let waiter = tokio::spawn(async move { g.acquire().await.map(|_| ()) });
        tokio::task::yield_now().await;
        gate.close();

        assert_eq!(waiter.await.unwrap(), Err(GateError::Closed));
        drop(held);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.acquired(), 1);
        assert_eq!(gate.released(), 1);
        assert_eq!(gate.acquire().await.unwrap_err(), GateError::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_timeout_reports_the_limit() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let _held = gate.acquire().await.unwrap();

        let limit = Duration::from_millis(250);
        let err = gate.acquire_timeout(limit).await.unwrap_err();
        assert_eq!(err, GateError::Timeout(limit));
        assert_eq!(gate.acquired(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn peak_stays_within_capacity_and_permits_are_conserved() {
        for capacity in [1, 3, 8] {
            let gate = ConcurrencyGate::new(capacity).unwrap();
            let tracker = Arc::new(ConcurrencyTracker::new());

            let handles: Vec<_> = (0..64)
                .map(|_| {
                    let gate = gate.clone();
                    let tracker = Arc::clone(&tracker);
                    tokio::spawn(async move {
                        let _permit = gate.acquire().await.unwrap();
                        let _inside = tracker.track();
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    })
                })
                .collect();
            for h in handles {
                h.await.unwrap();
            }

            assert!(tracker.peak() <= capacity);
            assert_eq!(gate.available(), capacity);
            assert_eq!(gate.acquired(), 64);
            assert_eq!(gate.released(), 64);
        }
    }
}
