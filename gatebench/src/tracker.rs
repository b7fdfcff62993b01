use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free in-flight and peak counters.
///
/// `peak` is raised with a single `fetch_max` on the value returned by the
/// increment, so it is the true maximum of `in_flight` under any interleaving.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one more task as running and returns the new in-flight count.
    pub fn enter(&self) -> usize {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(current, Ordering::AcqRel);
        current
    }

    /// Marks one task as finished. An `exit` without a matching `enter` is
    /// ignored and leaves the count at zero.
    pub fn exit(&self) {
        let res = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if res.is_err() {
            tracing::error!("Concurrency tracker exited without a matching enter");
        }
    }

    /// [`enter`](Self::enter) now, [`exit`](Self::exit) when the guard drops.
    pub fn track(&self) -> InFlightGuard<'_> {
        let current = self.enter();
        InFlightGuard {
            tracker: self,
            current,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct InFlightGuard<'a> {
    tracker: &'a ConcurrencyTracker,
    current: usize,
}

impl InFlightGuard<'_> {
    /// In-flight count right after this guard entered.
    pub fn entered_at(&self) -> usize {
        self.current
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.tracker.exit();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn enter_and_exit_move_in_flight() {
        let tracker = ConcurrencyTracker::new();
        assert_eq!(tracker.enter(), 1);
        assert_eq!(tracker.enter(), 2);
        tracker.exit();
        assert_eq!(tracker.enter(), 2);
        tracker.exit();
        tracker.exit();
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.peak(), 2);
    }

    #[test]
    fn guard_exits_on_drop() {
        let tracker = ConcurrencyTracker::new();
        {
            let outer = tracker.track();
            let inner = tracker.track();
            assert_eq!(outer.entered_at(), 1);
            assert_eq!(inner.entered_at(), 2);
        }
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.peak(), 2);
    }

    #[test]
    fn peak_is_exact_under_contention() {
        let tracker = Arc::new(ConcurrencyTracker::new());
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let _guard = tracker.track();
                    // everyone is inside before anyone leaves
                    barrier.wait();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tracker.peak(), 16);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn peak_never_decreases() {
        let tracker = ConcurrencyTracker::new();
        for _ in 0..5 {
            tracker.enter();
        }
        for _ in 0..5 {
            tracker.exit();
        }
        tracker.enter();
        assert_eq!(tracker.peak(), 5);
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn unmatched_exit_saturates_at_zero() {
        let tracker = ConcurrencyTracker::new();
        tracker.exit();
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.enter(), 1);
        assert_eq!(tracker.peak(), 1);
    }
}
