//! # Remote Bucket (Grid)
//!
//! Applies the same [`crate::algorithm`] functions against state living in a
//! distributed key/value grid, via server-side entry processors instead of a
//! local CAS cell. See spec.md §4.5.
//!
//! The grid itself is an external collaborator specified only at its
//! interface ([`GridBackend`]); `redis_backend` supplies one concrete
//! implementation.

use crate::algorithm::{self, ReservationOutcome};
use crate::error::{Result, ThrottlerError};
use crate::metrics::BucketMetrics;
use crate::state::{Configuration, GridBucketState};
use crate::time::{TimeSource, WallClock};
use std::sync::{Arc, OnceLock};

/// What a remote bucket does when its grid entry is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Silently recreate the bucket from the configuration supplied at
    /// construction time.
    Reconstruct,
    /// Surface [`ThrottlerError::BucketNotFound`] instead.
    Throw,
}

/// An opcode plus payload, executed atomically by the grid against one
/// cache entry. This is the "named opcodes instead of serialized lambdas"
/// design from spec.md §9: auditable, and it never ships executable code
/// across a process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryProcessor {
    TryConsume { n: u64 },
    Reserve { n: u64, max_wait_nanos: u64 },
    ConsumeAsMuchAsPossible { limit: Option<u64> },
    AddTokens { n: u64 },
    GetState,
}

/// The result of applying an [`EntryProcessor`] to a grid entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryResult {
    Consumed(bool),
    Reserved(ReservationOutcome),
    ConsumedAmount(u64),
    Added,
    AvailableTokens(u64),
}

/// The grid collaborator contract (spec.md §6): atomic read-modify-write of
/// one cache entry, keyed by an opaque string, carrying a
/// [`GridBucketState`] plus a fresh timestamp for each attempt.
///
/// A production implementation (e.g. `redis_backend::RedisGridBackend`)
/// executes the opcode server-side in one round trip; a test double may
/// simply lock a `Mutex<HashMap<..>>` and call straight into `algorithm`.
pub trait GridBackend: Send + Sync {
    /// Applies `processor` atomically to the entry at `key`. `now_nanos` is
    /// evaluated by the caller (not the grid) and passed through so the
    /// grid's own clock never needs to be trusted. `on_missing` governs
    /// entry creation when the key is absent.
    fn invoke(
        &self,
        key: &str,
        processor: EntryProcessor,
        now_nanos: u64,
        on_missing: Option<&Configuration>,
    ) -> Result<EntryResult>;
}

fn apply_processor(
    configuration: &Configuration,
    grid_state: &GridBucketState,
    processor: EntryProcessor,
    now_nanos: u64,
) -> Result<(EntryResult, GridBucketState)> {
    let state = &grid_state.state;
    let (result, new_state) = match processor {
        EntryProcessor::TryConsume { n } => {
            let (ok, next) = algorithm::try_consume(configuration, state, n, now_nanos)?;
            (EntryResult::Consumed(ok), next)
        }
        EntryProcessor::Reserve { n, max_wait_nanos } => {
            let (outcome, next) =
                algorithm::try_consume_and_reserve(configuration, state, n, now_nanos, max_wait_nanos)?;
            (EntryResult::Reserved(outcome), next)
        }
        EntryProcessor::ConsumeAsMuchAsPossible { limit } => {
            let (consumed, next) =
                algorithm::consume_as_much_as_possible(configuration, state, limit, now_nanos)?;
            (EntryResult::ConsumedAmount(consumed), next)
        }
        EntryProcessor::AddTokens { n } => {
            let next = algorithm::add_tokens(configuration, state, n, now_nanos)?;
            (EntryResult::Added, next)
        }
        EntryProcessor::GetState => {
            let next = algorithm::refill_all(configuration, state, now_nanos);
            let available = next.min_available_tokens();
            (EntryResult::AvailableTokens(available), next)
        }
    };
    Ok((
        result,
        GridBucketState::new(grid_state.configuration.clone(), new_state),
    ))
}

/// Reference implementation of the entry-processor semantics (spec.md
/// §4.5), usable both by `redis_backend`'s Lua dispatch (as the formula the
/// Lua script mirrors) and directly by in-memory test doubles.
pub fn apply_entry_processor(
    existing: Option<GridBucketState>,
    processor: EntryProcessor,
    now_nanos: u64,
    recovery: RecoveryStrategy,
    on_missing: Option<&Configuration>,
) -> Result<(EntryResult, Option<GridBucketState>)> {
    let grid_state = match existing {
        Some(s) => s,
        None => match recovery {
            RecoveryStrategy::Reconstruct => {
                let configuration = on_missing.ok_or_else(|| {
                    ThrottlerError::InvalidArgument(
                        "RECONSTRUCT requires a configuration supplier".into(),
                    )
                })?;
                GridBucketState::fresh(configuration.clone(), now_nanos)
            }
            RecoveryStrategy::Throw => return Err(ThrottlerError::BucketNotFound("".into())),
        },
    };
    let (result, next) = apply_processor(&grid_state.configuration, &grid_state, processor, now_nanos)?;
    Ok((result, Some(next)))
}

/// A bucket whose state lives behind a [`GridBackend`].
pub struct RemoteBucket<B: GridBackend> {
    key: String,
    backend: B,
    configuration: OnceLock<Configuration>,
    config_supplier: Box<dyn Fn() -> Configuration + Send + Sync>,
    recovery: RecoveryStrategy,
    metrics: BucketMetrics,
    clock: Arc<dyn TimeSource>,
}

impl<B: GridBackend> RemoteBucket<B> {
    pub fn new(
        key: impl Into<String>,
        backend: B,
        config_supplier: impl Fn() -> Configuration + Send + Sync + 'static,
        recovery: RecoveryStrategy,
    ) -> Self {
        Self::with_clock(key, backend, config_supplier, recovery, Arc::new(WallClock))
    }

    /// As [`RemoteBucket::new`], but with an explicit clock — used by tests
    /// and by callers that already hold a shared clock instance.
    pub fn with_clock(
        key: impl Into<String>,
        backend: B,
        config_supplier: impl Fn() -> Configuration + Send + Sync + 'static,
        recovery: RecoveryStrategy,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            key: key.into(),
            backend,
            configuration: OnceLock::new(),
            config_supplier: Box::new(config_supplier),
            recovery,
            metrics: BucketMetrics::default(),
            clock,
        }
    }

    pub fn metrics(&self) -> &BucketMetrics {
        &self.metrics
    }

    /// The timestamp [`crate::bucket::RateLimitedBucket`] should pass for
    /// this bucket's next call, read from the clock captured at
    /// construction so repeated calls see a single, consistent timeline
    /// instead of a fresh epoch each time.
    pub fn now_nanos(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Evaluates `config_supplier` at most once, caching the result for
    /// every subsequent `RECONSTRUCT` (spec.md §4.5, `ProxyManager`).
    fn configuration(&self) -> &Configuration {
        self.configuration.get_or_init(|| (self.config_supplier)())
    }

    fn invoke(&self, processor: EntryProcessor, now_nanos: u64) -> Result<EntryResult> {
        let on_missing = matches!(self.recovery, RecoveryStrategy::Reconstruct)
            .then(|| self.configuration());
        self.backend
            .invoke(&self.key, processor, now_nanos, on_missing)
            .inspect_err(|_| self.metrics.record_grid_failure())
    }

    pub fn try_consume(&self, n: u64, now_nanos: u64) -> Result<bool> {
        match self.invoke(EntryProcessor::TryConsume { n }, now_nanos)? {
            EntryResult::Consumed(ok) => {
                if ok {
                    self.metrics.record_consumed();
                } else {
                    self.metrics.record_rejected();
                }
                Ok(ok)
            }
            _ => unreachable!("TryConsume always yields Consumed"),
        }
    }

    pub fn try_consume_as_much_as_possible(&self, limit: Option<u64>, now_nanos: u64) -> Result<u64> {
        match self.invoke(EntryProcessor::ConsumeAsMuchAsPossible { limit }, now_nanos)? {
            EntryResult::ConsumedAmount(n) => Ok(n),
            _ => unreachable!("ConsumeAsMuchAsPossible always yields ConsumedAmount"),
        }
    }

    pub fn try_consume_and_return_wait_nanos(
        &self,
        n: u64,
        max_wait_nanos: u64,
        now_nanos: u64,
    ) -> Result<Option<u64>> {
        match self.invoke(EntryProcessor::Reserve { n, max_wait_nanos }, now_nanos)? {
            EntryResult::Reserved(ReservationOutcome::Reserved { wait_nanos }) => {
                self.metrics.record_reserved();
                Ok(Some(wait_nanos))
            }
            EntryResult::Reserved(ReservationOutcome::Rejected) => {
                self.metrics.record_rejected();
                Ok(None)
            }
            _ => unreachable!("Reserve always yields Reserved"),
        }
    }

    pub fn add_tokens(&self, n: u64, now_nanos: u64) -> Result<()> {
        match self.invoke(EntryProcessor::AddTokens { n }, now_nanos)? {
            EntryResult::Added => Ok(()),
            _ => unreachable!("AddTokens always yields Added"),
        }
    }

    pub fn available_tokens(&self, now_nanos: u64) -> Result<u64> {
        match self.invoke(EntryProcessor::GetState, now_nanos)? {
            EntryResult::AvailableTokens(n) => Ok(n),
            _ => unreachable!("GetState always yields AvailableTokens"),
        }
    }
}

/// Factory yielding lazy [`RemoteBucket`] handles for a shared grid backend,
/// matching spec.md §4.5's `ProxyManager`.
pub struct ProxyManager<B: GridBackend + Clone> {
    backend: B,
    recovery: RecoveryStrategy,
    clock: Arc<dyn TimeSource>,
}

impl<B: GridBackend + Clone> ProxyManager<B> {
    pub fn new(backend: B, recovery: RecoveryStrategy) -> Self {
        Self::with_clock(backend, recovery, Arc::new(WallClock))
    }

    /// As [`ProxyManager::new`], sharing an explicit clock across every
    /// proxy it hands out.
    pub fn with_clock(backend: B, recovery: RecoveryStrategy, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            backend,
            recovery,
            clock,
        }
    }

    pub fn get_proxy(
        &self,
        key: impl Into<String>,
        config_supplier: impl Fn() -> Configuration + Send + Sync + 'static,
    ) -> RemoteBucket<B> {
        RemoteBucket::with_clock(
            key,
            self.backend.clone(),
            config_supplier,
            self.recovery,
            Arc::clone(&self.clock),
        )
    }
}
