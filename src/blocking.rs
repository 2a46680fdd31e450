//! # Blocking Envelope
//!
//! Turns a "nanoseconds to wait" result from `tryConsumeAndReserve` into a
//! parked thread, per spec.md §4.6. The reservation itself happens inside
//! the CAS loop (so the critical section stays wait-free up to contention);
//! only the park happens here, outside it.
//!
//! Rust has no JVM-style cooperative thread interrupt, so interruption is
//! modeled explicitly: callers that want `consume` to be interruptible share
//! an [`InterruptFlag`] with whatever will call [`InterruptFlag::interrupt`]
//! (e.g. a signal handler or a supervisor thread). `consume_uninterruptibly`
//! simply never looks at one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cooperative interrupt signal checked between park slices.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests that any in-progress interruptible park return early.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// An injected parking capability, matching spec.md §4.6's two-method
/// blocking strategy.
pub trait BlockingStrategy: Send + Sync {
    /// Parks for `duration`, checking `interrupt` between slices. Returns
    /// `false` if interrupted before the full duration elapsed.
    fn park(&self, duration: Duration, interrupt: &InterruptFlag) -> bool;

    /// Parks for the full `duration`, ignoring interruption.
    fn park_uninterruptibly(&self, duration: Duration);
}

/// The default blocking strategy: slices the wait into bounded
/// `thread::park_timeout` calls and recomputes the remaining duration from a
/// captured deadline using delta comparison (`now - deadline >= 0`), so that
/// `Instant` arithmetic near its own internal wraparound (spec.md §4.6)
/// cannot misbehave.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParkingStrategy {
    slice: Duration,
}

impl ParkingStrategy {
    /// `slice` bounds how long a single park call may run before the
    /// interrupt flag is re-checked; smaller slices give snappier
    /// interruption at the cost of more wakeups.
    pub fn new(slice: Duration) -> Self {
        Self { slice }
    }
}

const DEFAULT_SLICE: Duration = Duration::from_millis(50);

impl BlockingStrategy for ParkingStrategy {
    fn park(&self, duration: Duration, interrupt: &InterruptFlag) -> bool {
        let slice = if self.slice.is_zero() { DEFAULT_SLICE } else { self.slice };
        let deadline = Instant::now() + duration;
        loop {
            if interrupt.is_interrupted() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let remaining = deadline - now;
            std::thread::park_timeout(remaining.min(slice));
        }
    }

    fn park_uninterruptibly(&self, duration: Duration) {
        let slice = if self.slice.is_zero() { DEFAULT_SLICE } else { self.slice };
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            std::thread::park_timeout(remaining.min(slice));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn park_returns_true_after_full_duration() {
        let strategy = ParkingStrategy::new(Duration::from_millis(5));
        let flag = InterruptFlag::new();
        let start = Instant::now();
        let completed = strategy.park(Duration::from_millis(20), &flag);
        assert!(completed);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn park_returns_false_when_interrupted() {
        let strategy = ParkingStrategy::new(Duration::from_millis(5));
        let flag = InterruptFlag::new();
        let barrier = Arc::new(Barrier::new(2));

        let interrupter_flag = flag.clone();
        let interrupter_barrier = Arc::clone(&barrier);
        let handle = thread::spawn(move || {
            interrupter_barrier.wait();
            thread::sleep(Duration::from_millis(10));
            interrupter_flag.interrupt();
        });

        barrier.wait();
        let completed = strategy.park(Duration::from_secs(10), &flag);
        assert!(!completed);
        handle.join().unwrap();
    }

    #[test]
    fn fresh_flag_is_not_interrupted() {
        let flag = InterruptFlag::new();
        assert!(!flag.is_interrupted());
        flag.interrupt();
        assert!(flag.is_interrupted());
        flag.clear();
        assert!(!flag.is_interrupted());
    }
}
