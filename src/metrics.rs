//! # Bucket Metrics
//!
//! Lightweight, process-wide counters for observability. Narrowed from the
//! teacher's per-client async `MetricsCollector` (an HTTP-service concern
//! keyed by client id) down to a single bucket's own counters, since a
//! library bucket has no per-request identity to key on — the embedding
//! application is expected to aggregate per-key metrics itself if it wants
//! them, the same way it owns key derivation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracked by a single [`crate::local_bucket::LocalBucket`]
/// or [`crate::grid::RemoteBucket`].
#[derive(Debug, Default)]
pub struct BucketMetrics {
    consumed: AtomicU64,
    rejected: AtomicU64,
    reserved: AtomicU64,
    cas_retries: AtomicU64,
    grid_failures: AtomicU64,
}

/// A point-in-time copy of [`BucketMetrics`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub consumed: u64,
    pub rejected: u64,
    pub reserved: u64,
    pub cas_retries: u64,
    pub grid_failures: u64,
}

impl BucketMetrics {
    pub(crate) fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reserved(&self) {
        self.reserved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_grid_failure(&self) {
        self.grid_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("grid backend operation failed");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            consumed: self.consumed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            reserved: self.reserved.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            grid_failures: self.grid_failures.load(Ordering::Relaxed),
        }
    }
}
