//! # Time Source
//!
//! The token-bucket algorithm is a pure function of `(state, now, request)`.
//! Everything that needs "the current time" goes through this trait so tests
//! can drive the clock by hand instead of sleeping on the wall clock.
//!
//! Timestamps are always nanoseconds as a `u64`. A local bucket's state never
//! leaves the process, so [`MonotonicClock`]'s process-private epoch is the
//! right choice there — it can't jump backwards the way `SystemTime` can. A
//! grid-backed bucket's state is read by other processes, though, so it needs
//! [`WallClock`]'s shared Unix-epoch reference point instead; the refill
//! algorithm's existing backwards-clock guard (`now < last_refill` treated as
//! zero elapsed) absorbs the rare step back that comes with that tradeoff.
//! [`FakeClock`] is the test double for either case.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A monotonic nanosecond clock, injectable so buckets can be driven by a
/// synthetic clock in tests.
///
/// Implementations must never go backwards except via the explicit
/// clock-skew handling already built into the refill algorithm (which treats
/// `now < last_refill` as zero elapsed time, see `algorithm::refill_one`).
pub trait TimeSource: Send + Sync {
    /// Current time in nanoseconds, relative to an arbitrary fixed epoch.
    fn now_nanos(&self) -> u64;
}

/// Production clock backed by [`std::time::Instant`].
///
/// `Instant` has no fixed epoch, so we capture one lazily the first time a
/// `MonotonicClock` is constructed and measure nanoseconds relative to it.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Wall-clock time since the Unix epoch, for state that crosses process
/// boundaries (grid-backed buckets). `MonotonicClock`'s epoch is private to
/// the process that created it, so two processes reading the same grid entry
/// under their own `MonotonicClock` would disagree about what a stored
/// timestamp means; `WallClock` gives them a shared reference point instead.
///
/// `SystemTime` can step backwards (NTP adjustment); the refill algorithm
/// already treats `now < last_refill` as zero elapsed time for exactly this
/// reason, so a small step back costs a missed refill tick, not incorrect
/// token accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// A clock a test can set directly, including near the `u64` wraparound
/// boundary (spec.md §8 invariant 6, "clock-wrap safety").
#[derive(Debug, Clone)]
pub struct FakeClock {
    nanos: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_nanos: u64) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(start_nanos)),
        }
    }

    /// Advances the clock by `delta_nanos`, wrapping on overflow exactly as a
    /// real nanosecond counter near `u64::MAX` would.
    pub fn advance(&self, delta_nanos: u64) {
        self.nanos.fetch_add(delta_nanos, Ordering::Relaxed);
    }

    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::Relaxed);
    }
}

impl TimeSource for FakeClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Relaxed)
    }
}
