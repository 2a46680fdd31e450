//! # Unified Bucket Interface
//!
//! [`RateLimitedBucket`] is the contract both [`LocalBucket`] and
//! [`RemoteBucket`] satisfy: everything downstream of this crate (a web
//! handler, a queue consumer) should be able to take `&dyn
//! RateLimitedBucket` and not care whether the state behind it lives in this
//! process or a grid.
//!
//! `consume`/`consume_uninterruptibly` are not part of either bucket's own
//! API: they are built once, here, on top of `try_consume_and_return_wait_nanos`
//! plus a [`BlockingStrategy`] (spec.md §4.6), so the parking behavior is
//! identical for local and remote buckets.

use crate::blocking::{BlockingStrategy, InterruptFlag, ParkingStrategy};
use crate::error::{Result, ThrottlerError};
use crate::grid::{GridBackend, RemoteBucket};
use crate::local_bucket::LocalBucket;
use std::time::Duration;

/// The operations every bucket, local or remote, exposes (spec.md §6).
pub trait RateLimitedBucket {
    fn try_consume(&self, n: u64) -> Result<bool>;
    fn try_consume_as_much_as_possible(&self, limit: Option<u64>) -> Result<u64>;
    fn try_consume_and_return_wait_nanos(&self, n: u64, max_wait_nanos: u64) -> Result<Option<u64>>;
    fn add_tokens(&self, n: u64) -> Result<()>;
    fn available_tokens(&self) -> Result<u64>;
}

impl RateLimitedBucket for LocalBucket {
    fn try_consume(&self, n: u64) -> Result<bool> {
        LocalBucket::try_consume(self, n)
    }

    fn try_consume_as_much_as_possible(&self, limit: Option<u64>) -> Result<u64> {
        LocalBucket::try_consume_as_much_as_possible(self, limit)
    }

    fn try_consume_and_return_wait_nanos(&self, n: u64, max_wait_nanos: u64) -> Result<Option<u64>> {
        LocalBucket::try_consume_and_return_wait_nanos(self, n, max_wait_nanos)
    }

    fn add_tokens(&self, n: u64) -> Result<()> {
        LocalBucket::add_tokens(self, n)
    }

    fn available_tokens(&self) -> Result<u64> {
        Ok(LocalBucket::available_tokens(self))
    }
}

impl<B: GridBackend> RateLimitedBucket for RemoteBucket<B> {
    fn try_consume(&self, n: u64) -> Result<bool> {
        RemoteBucket::try_consume(self, n, self.now_nanos())
    }

    fn try_consume_as_much_as_possible(&self, limit: Option<u64>) -> Result<u64> {
        RemoteBucket::try_consume_as_much_as_possible(self, limit, self.now_nanos())
    }

    fn try_consume_and_return_wait_nanos(&self, n: u64, max_wait_nanos: u64) -> Result<Option<u64>> {
        RemoteBucket::try_consume_and_return_wait_nanos(self, n, max_wait_nanos, self.now_nanos())
    }

    fn add_tokens(&self, n: u64) -> Result<()> {
        RemoteBucket::add_tokens(self, n, self.now_nanos())
    }

    fn available_tokens(&self) -> Result<u64> {
        RemoteBucket::available_tokens(self, self.now_nanos())
    }
}

/// Blocks the calling thread until `n` tokens are available (or
/// `max_wait_nanos` is exceeded), returning once the reservation's wait has
/// elapsed. Interruptible via `interrupt` (spec.md §4.6).
pub fn consume(
    bucket: &dyn RateLimitedBucket,
    n: u64,
    max_wait_nanos: u64,
    interrupt: &InterruptFlag,
) -> Result<()> {
    consume_with_strategy(bucket, n, max_wait_nanos, interrupt, &ParkingStrategy::default())
}

/// As [`consume`], but ignores `interrupt` and always parks for the full
/// reserved duration.
pub fn consume_uninterruptibly(bucket: &dyn RateLimitedBucket, n: u64, max_wait_nanos: u64) -> Result<()> {
    let wait_nanos = bucket
        .try_consume_and_return_wait_nanos(n, max_wait_nanos)?
        .ok_or_else(|| ThrottlerError::InvalidArgument("requested amount can never be satisfied".into()))?;
    ParkingStrategy::default().park_uninterruptibly(Duration::from_nanos(wait_nanos));
    Ok(())
}

fn consume_with_strategy(
    bucket: &dyn RateLimitedBucket,
    n: u64,
    max_wait_nanos: u64,
    interrupt: &InterruptFlag,
    strategy: &dyn BlockingStrategy,
) -> Result<()> {
    let wait_nanos = bucket
        .try_consume_and_return_wait_nanos(n, max_wait_nanos)?
        .ok_or_else(|| ThrottlerError::InvalidArgument("requested amount can never be satisfied".into()))?;
    if strategy.park(Duration::from_nanos(wait_nanos), interrupt) {
        Ok(())
    } else {
        Err(ThrottlerError::InterruptedWait)
    }
}
