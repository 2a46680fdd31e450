//! # Local Bucket
//!
//! A bucket whose state lives in this process, guarded by a lock-free
//! compare-and-swap cell. Every public operation is a read-modify-write loop
//! over `algorithm`'s pure functions (spec.md §4.4):
//!
//! ```text
//! repeat:
//!   observed = cell.load()
//!   (result, next) = f(observed, now(), args)
//!   if cell.compare_and_swap(observed, next): return result
//! ```
//!
//! The loop has no retry cap — starvation is bounded by operation count, not
//! contended threads, since every losing CAS means some other thread made
//! progress. Grounded on the compare_exchange retry shape in
//! `examples/pelikan-io-rustcommon/ratelimit`'s `Ratelimiter::tick`, adapted
//! from a scalar atomic to a whole-`BucketState` swap via `arc_swap`.

use crate::algorithm::{self, ReservationOutcome};
use crate::error::{Result, ThrottlerError};
use crate::metrics::BucketMetrics;
use crate::state::{BucketState, Configuration};
use crate::time::{MonotonicClock, TimeSource};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// A token bucket whose state is owned entirely by this process.
pub struct LocalBucket {
    configuration: Configuration,
    cell: ArcSwap<BucketState>,
    clock: Arc<dyn TimeSource>,
    metrics: BucketMetrics,
}

impl LocalBucket {
    pub fn new(configuration: Configuration) -> Self {
        Self::with_clock(configuration, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(configuration: Configuration, clock: Arc<dyn TimeSource>) -> Self {
        let now = clock.now_nanos();
        let state = BucketState::new(&configuration, now);
        tracing::info!(bandwidths = configuration.bandwidths().len(), "local bucket constructed");
        Self {
            configuration,
            cell: ArcSwap::from_pointee(state),
            clock,
            metrics: BucketMetrics::default(),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn metrics(&self) -> &BucketMetrics {
        &self.metrics
    }

    fn now(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Runs `f` against the observed state in a CAS retry loop, swapping in
    /// whatever new state `f` computes regardless of which branch it took
    /// (refill is always persisted, even on a logical failure).
    fn cas_loop<T>(
        &self,
        mut f: impl FnMut(&BucketState, u64) -> Result<(T, BucketState)>,
    ) -> Result<T> {
        loop {
            let observed = self.cell.load();
            let now = self.now();
            let (result, next) = f(&observed, now)?;
            let next = Arc::new(next);
            let prev = self.cell.compare_and_swap(&*observed, next);
            if Arc::ptr_eq(&*prev, &*observed) {
                return Ok(result);
            }
            self.metrics.record_cas_retry();
            tracing::debug!("local bucket CAS lost race, retrying");
        }
    }

    pub fn try_consume(&self, n: u64) -> Result<bool> {
        let configuration = &self.configuration;
        let allowed = self.cas_loop(|state, now| algorithm::try_consume(configuration, state, n, now))?;
        if allowed {
            self.metrics.record_consumed();
        } else {
            self.metrics.record_rejected();
        }
        Ok(allowed)
    }

    pub fn try_consume_as_much_as_possible(&self, limit: Option<u64>) -> Result<u64> {
        let configuration = &self.configuration;
        self.cas_loop(|state, now| {
            algorithm::consume_as_much_as_possible(configuration, state, limit, now)
        })
    }

    pub fn try_consume_and_return_wait_nanos(
        &self,
        n: u64,
        max_wait_nanos: u64,
    ) -> Result<Option<u64>> {
        let configuration = &self.configuration;
        let outcome = self.cas_loop(|state, now| {
            algorithm::try_consume_and_reserve(configuration, state, n, now, max_wait_nanos)
        })?;
        match outcome {
            ReservationOutcome::Reserved { wait_nanos } => {
                self.metrics.record_reserved();
                Ok(Some(wait_nanos))
            }
            ReservationOutcome::Rejected => {
                self.metrics.record_rejected();
                Ok(None)
            }
        }
    }

    pub fn add_tokens(&self, n: u64) -> Result<()> {
        let configuration = &self.configuration;
        self.cas_loop(|state, now| {
            algorithm::add_tokens(configuration, state, n, now).map(|next| ((), next))
        })
    }

    pub fn available_tokens(&self) -> u64 {
        let configuration = &self.configuration;
        // Infallible: refill alone never returns InvalidArgument.
        self.cas_loop(|state, now| {
            let refilled = algorithm::refill_all(configuration, state, now);
            let available = refilled.min_available_tokens();
            Ok::<_, ThrottlerError>((available, refilled))
        })
        .expect("refill cannot fail")
    }

    /// Installs a new configuration, carrying forward token state for
    /// matching bandwidth ids (spec.md §3). The new configuration governs
    /// all subsequent operations.
    pub fn reconfigure(&mut self, new_configuration: Configuration) {
        let now = self.now();
        let observed = self.cell.load();
        let reconfigured = self.configuration.reconfigure(&observed, &new_configuration, now);
        self.cell.store(Arc::new(reconfigured));
        self.configuration = new_configuration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::Bandwidth;
    use crate::time::FakeClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn bucket(capacity: u64, period: Duration) -> (LocalBucket, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(0));
        let cfg = Configuration::new(vec![Bandwidth::simple(capacity, period).unwrap()]).unwrap();
        (LocalBucket::with_clock(cfg, clock.clone()), clock)
    }

    #[test]
    fn try_consume_exhausts_then_denies() {
        let (bucket, _clock) = bucket(10, Duration::from_secs(86_400));
        assert!(bucket.try_consume(10).unwrap());
        assert!(!bucket.try_consume(1).unwrap());
    }

    #[test]
    fn refill_over_time_restores_tokens() {
        let (bucket, clock) = bucket(10, Duration::from_secs(10));
        assert!(bucket.try_consume(10).unwrap());
        clock.advance(5_000_000_000);
        assert_eq!(bucket.available_tokens(), 5);
    }

    #[test]
    fn add_tokens_never_exceeds_capacity() {
        let (bucket, _clock) = bucket(10, Duration::from_secs(10));
        bucket.add_tokens(1000).unwrap();
        assert_eq!(bucket.available_tokens(), 10);
    }

    #[test]
    fn reservation_returns_increasing_waits() {
        let (bucket, _clock) = bucket(10, Duration::from_secs(10));
        assert!(bucket.try_consume(10).unwrap());
        let first = bucket.try_consume_and_return_wait_nanos(3, u64::MAX).unwrap();
        let second = bucket.try_consume_and_return_wait_nanos(3, u64::MAX).unwrap();
        assert_eq!(first, Some(3_000_000_000));
        assert_eq!(second, Some(6_000_000_000));
    }

    #[test]
    fn metrics_track_consumption() {
        let (bucket, _clock) = bucket(5, Duration::from_secs(10));
        bucket.try_consume(3).unwrap();
        bucket.try_consume(100).unwrap();
        let snapshot = bucket.metrics().snapshot();
        assert_eq!(snapshot.consumed, 1);
        assert_eq!(snapshot.rejected, 1);
    }

    #[test]
    fn concurrent_consumers_never_oversell_capacity() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::thread;

        let clock = Arc::new(FakeClock::new(0));
        let cfg = Configuration::new(vec![Bandwidth::simple(1000, Duration::from_secs(3600)).unwrap()])
            .unwrap();
        let bucket = Arc::new(LocalBucket::with_clock(cfg, clock));
        let granted = Arc::new(AtomicU64::new(0));

        thread::scope(|scope| {
            for _ in 0..16 {
                let bucket = Arc::clone(&bucket);
                let granted = Arc::clone(&granted);
                scope.spawn(move || {
                    for _ in 0..100 {
                        if bucket.try_consume(1).unwrap() {
                            granted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(granted.load(Ordering::Relaxed), 1000);
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn reconfigure_carries_state_for_matching_id() {
        let clock = Arc::new(FakeClock::new(0));
        let old_bw = Bandwidth::simple(10, Duration::from_secs(10)).unwrap().with_id(9);
        let old_cfg = Configuration::new(vec![old_bw]).unwrap();
        let mut bucket = LocalBucket::with_clock(old_cfg, clock);
        bucket.try_consume(4).unwrap();

        let new_bw = Bandwidth::simple(100, Duration::from_secs(10)).unwrap().with_id(9);
        bucket.reconfigure(Configuration::new(vec![new_bw]).unwrap());
        assert_eq!(bucket.available_tokens(), 6);
    }
}
