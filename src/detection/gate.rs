// Bounded-concurrency admission gate.
//
// A counter of in-flight pipeline runs with a fixed capacity. Entry is a
// compare-and-increment that either succeeds or is refused on the spot;
// callers never wait. The permit returned on success
// gives the slot back when dropped, so every exit path releases exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Reference capacity: five concurrent feature-detection jobs.
pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    in_flight: AtomicUsize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Take a slot if one is free. Never blocks.
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < self.capacity).then_some(held + 1)
            })
            .is_ok();

        if admitted {
            Some(AdmissionPermit {
                gate: Arc::clone(self),
            })
        } else {
            None
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn release(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "admission gate released more often than acquired");
    }
}

/// One admitted job. Dropping it releases the slot.
#[must_use = "dropping the permit releases the slot immediately"]
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_capacity_is_enforced_sequentially() {
        let gate = AdmissionGate::new(DEFAULT_CAPACITY);
        let permits: Vec<_> = (0..5).map(|_| gate.try_acquire()).collect();
        assert!(permits.iter().all(Option::is_some));
        assert_eq!(gate.in_flight(), 5);
        assert!(gate.try_acquire().is_none(), "6th acquire must be refused");
        assert_eq!(gate.in_flight(), 5);
    }

    #[test]
    fn test_release_admits_exactly_one_more() {
        let gate = AdmissionGate::new(5);
        let mut permits: Vec<_> = (0..5).filter_map(|_| gate.try_acquire()).collect();
        assert_eq!(permits.len(), 5);

        drop(permits.pop());
        assert_eq!(gate.in_flight(), 4);

        let again = gate.try_acquire();
        assert!(again.is_some());
        assert!(gate.try_acquire().is_none());
        drop(again);
        drop(permits);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_acquire_admits_exactly_capacity() {
        let gate = AdmissionGate::new(5);
        let contenders = 16;
        let start = Arc::new(Barrier::new(contenders));
        let hold = Arc::new(Barrier::new(contenders + 1));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let start = Arc::clone(&start);
                let hold = Arc::clone(&hold);
                thread::spawn(move || {
                    start.wait();
                    let permit = gate.try_acquire();
                    let admitted = permit.is_some();
                    // Keep permits alive until every thread has tried
                    hold.wait();
                    drop(permit);
                    admitted
                })
            })
            .collect();

        hold.wait();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(admitted, 5);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_never_exceeds_capacity_under_churn() {
        let gate = AdmissionGate::new(3);
        let observed = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let observed = Arc::clone(&observed);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        if let Some(permit) = gate.try_acquire() {
                            let now = observed.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            assert!(now <= 3, "{} holders with capacity 3", now);
                            thread::yield_now();
                            observed.fetch_sub(1, Ordering::SeqCst);
                            drop(permit);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_permit_released_on_panic() {
        let gate = AdmissionGate::new(1);
        let worker_gate = Arc::clone(&gate);
        let result = thread::spawn(move || {
            let _permit = worker_gate.try_acquire().unwrap();
            panic!("pipeline blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_zero_capacity_refuses_everything() {
        let gate = AdmissionGate::new(0);
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.capacity(), 0);
    }
}
