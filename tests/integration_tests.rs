use bandwidth_limiter::bandwidth::Bandwidth;
use bandwidth_limiter::blocking::InterruptFlag;
use bandwidth_limiter::bucket::{self, RateLimitedBucket};
use bandwidth_limiter::grid::{GridBackend, ProxyManager, RecoveryStrategy};
use bandwidth_limiter::local_bucket::LocalBucket;
use bandwidth_limiter::state::Configuration;
use bandwidth_limiter::time::FakeClock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn single_bandwidth_bucket(capacity: u64, period: Duration) -> (LocalBucket, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::new(0));
    let cfg = Configuration::new(vec![Bandwidth::simple(capacity, period).unwrap()]).unwrap();
    (LocalBucket::with_clock(cfg, clock.clone()), clock)
}

#[test]
fn s1_exhausts_capacity_then_refills_on_schedule() {
    let (bucket, clock) = single_bandwidth_bucket(10, Duration::from_secs(10));
    assert!(bucket.try_consume(10).unwrap());
    assert!(!bucket.try_consume(1).unwrap());

    clock.advance(10_000_000_000);
    assert!(bucket.try_consume(10).unwrap());
}

#[test]
fn s2_multi_bandwidth_is_governed_by_the_strictest_rule() {
    let loose = Bandwidth::simple(1_000, Duration::from_secs(60)).unwrap();
    let strict = Bandwidth::simple(50, Duration::from_secs(10)).unwrap();
    let clock = Arc::new(FakeClock::new(0));
    let cfg = Configuration::new(vec![loose, strict]).unwrap();
    let bucket = LocalBucket::with_clock(cfg, clock);

    assert!(bucket.try_consume(50).unwrap());
    assert!(!bucket.try_consume(1).unwrap(), "strict bandwidth should block despite loose headroom");
}

#[test]
fn s3_reservation_schedule_matches_successive_waits() {
    let (bucket, _clock) = single_bandwidth_bucket(10, Duration::from_secs(10));
    assert!(bucket.try_consume(10).unwrap());

    let first = bucket.try_consume_and_return_wait_nanos(3, u64::MAX).unwrap();
    let second = bucket.try_consume_and_return_wait_nanos(3, u64::MAX).unwrap();
    assert_eq!(first, Some(3_000_000_000));
    assert_eq!(second, Some(6_000_000_000));
}

#[test]
fn s3b_blocking_consume_actually_parks_for_the_reserved_duration() {
    let clock = Arc::new(FakeClock::new(0));
    let cfg = Configuration::new(vec![Bandwidth::simple(1, Duration::from_millis(30)).unwrap()]).unwrap();
    let bucket = LocalBucket::with_clock(cfg, clock);
    assert!(bucket.try_consume(1).unwrap());

    let interrupt = InterruptFlag::new();
    let start = std::time::Instant::now();
    bucket::consume(&bucket, 1, u64::MAX, &interrupt).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn s4_interrupting_a_blocked_consume_surfaces_interrupted_error() {
    use std::sync::Barrier;
    use std::thread;

    let clock = Arc::new(FakeClock::new(0));
    let cfg = Configuration::new(vec![Bandwidth::simple(1, Duration::from_secs(3600)).unwrap()]).unwrap();
    let bucket = Arc::new(LocalBucket::with_clock(cfg, clock));
    assert!(bucket.try_consume(1).unwrap());

    let interrupt = InterruptFlag::new();
    let barrier = Arc::new(Barrier::new(2));

    let interrupter_flag = interrupt.clone();
    let interrupter_barrier = Arc::clone(&barrier);
    let handle = thread::spawn(move || {
        interrupter_barrier.wait();
        thread::sleep(Duration::from_millis(10));
        interrupter_flag.interrupt();
    });

    barrier.wait();
    let err = bucket::consume(bucket.as_ref(), 1, u64::MAX, &interrupt).unwrap_err();
    assert!(matches!(err, bandwidth_limiter::ThrottlerError::InterruptedWait));
    handle.join().unwrap();
}

#[test]
fn s5_reconfigure_carries_forward_state_for_matching_bandwidth_ids() {
    let clock = Arc::new(FakeClock::new(0));
    let old_bw = Bandwidth::simple(10, Duration::from_secs(10)).unwrap().with_id(1);
    let mut bucket = LocalBucket::with_clock(Configuration::new(vec![old_bw]).unwrap(), clock);
    bucket.try_consume(7).unwrap();
    assert_eq!(bucket.available_tokens(), 3);

    let new_bw = Bandwidth::simple(100, Duration::from_secs(10)).unwrap().with_id(1);
    bucket.reconfigure(Configuration::new(vec![new_bw]).unwrap());
    assert_eq!(bucket.available_tokens(), 3);
}

#[test]
fn s6_concurrent_local_consumers_never_oversell_the_bucket() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    let clock = Arc::new(FakeClock::new(0));
    let cfg = Configuration::new(vec![Bandwidth::simple(500, Duration::from_secs(3600)).unwrap()]).unwrap();
    let bucket = Arc::new(LocalBucket::with_clock(cfg, clock));
    let granted = Arc::new(AtomicU64::new(0));

    thread::scope(|scope| {
        for _ in 0..10 {
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

    assert_eq!(granted.load(Ordering::Relaxed), 500);
}

/// An in-memory `GridBackend`, standing in for a real grid's per-key
/// atomicity so the `RemoteBucket`/`ProxyManager` wiring can be exercised
/// without a live Redis instance.
#[derive(Clone, Default)]
struct InMemoryGrid {
    entries: Arc<Mutex<HashMap<String, bandwidth_limiter::state::GridBucketState>>>,
}

impl GridBackend for InMemoryGrid {
    fn invoke(
        &self,
        key: &str,
        processor: bandwidth_limiter::grid::EntryProcessor,
        now_nanos: u64,
        on_missing: Option<&Configuration>,
    ) -> bandwidth_limiter::Result<bandwidth_limiter::grid::EntryResult> {
        let mut entries = self.entries.lock().unwrap();
        let recovery = if on_missing.is_some() {
            RecoveryStrategy::Reconstruct
        } else {
            RecoveryStrategy::Throw
        };
        let (result, new_state) = bandwidth_limiter::grid::apply_entry_processor(
            entries.get(key).cloned(),
            processor,
            now_nanos,
            recovery,
            on_missing,
        )?;
        if let Some(new_state) = new_state {
            entries.insert(key.to_string(), new_state);
        }
        Ok(result)
    }
}

#[test]
fn s7_remote_bucket_through_proxy_manager_rejects_once_exhausted() {
    let grid = InMemoryGrid::default();
    let proxy = ProxyManager::new(grid, RecoveryStrategy::Reconstruct);
    let bucket = proxy.get_proxy("api:tenant-1", || {
        Configuration::new(vec![Bandwidth::simple(3, Duration::from_secs(60)).unwrap()]).unwrap()
    });

    assert!(bucket.try_consume(3, 0).unwrap());
    assert!(!bucket.try_consume(1, 0).unwrap());
}

#[test]
fn s8_grid_bucket_state_round_trips_through_json() {
    let cfg = Configuration::new(vec![Bandwidth::classic(100, 10, Duration::from_secs(5), 40).unwrap()]).unwrap();
    let fresh = bandwidth_limiter::state::GridBucketState::fresh(cfg, 0);

    let json = serde_json::to_string(&fresh).unwrap();
    let decoded: bandwidth_limiter::state::GridBucketState = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, fresh);
}
