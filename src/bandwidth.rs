//! # Bandwidth
//!
//! A [`Bandwidth`] is one rate rule: a capacity, a refill rate, and a refill
//! shape. A bucket is configured with one or more bandwidths (see
//! [`crate::state::Configuration`]); the effective limit at any moment is the
//! most restrictive of the set.
//!
//! # Example
//!
//! ```
//! use bandwidth_limiter::bandwidth::Bandwidth;
//! use std::time::Duration;
//!
//! // 1000 tokens per minute, starting full and refilling continuously.
//! let minute_limit = Bandwidth::simple(1000, Duration::from_secs(60)).unwrap();
//!
//! // 200 tokens per 10 seconds, starting full.
//! let burst_limit = Bandwidth::classic(200, 200, Duration::from_secs(10), 200).unwrap();
//! ```

use crate::error::ThrottlerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a bandwidth's tokens accrue between refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefillStrategy {
    /// Tokens accrue continuously; only whole tokens are ever observable and
    /// the fractional remainder carries forward so no drift accumulates over
    /// time (spec.md §4.2).
    Smooth,
    /// Tokens are added in discrete bursts exactly at period boundaries.
    Intervally,
}

/// An immutable description of one rate limit.
///
/// Validated at construction: `capacity > 0`, `refill_period` non-zero,
/// `1 <= refill_tokens <= capacity`, `initial_tokens <= capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bandwidth {
    capacity: u64,
    refill_tokens: u64,
    refill_period_nanos: u64,
    initial_tokens: u64,
    strategy: RefillStrategy,
    /// Optional identity used to match bandwidths across a reconfiguration.
    /// `None` never matches anything, including another `None` (see
    /// DESIGN.md's reconfiguration-id decision).
    id: Option<u64>,
}

impl Bandwidth {
    /// Full constructor. Prefer [`Bandwidth::simple`] or
    /// [`Bandwidth::classic`] unless you need a non-default refill strategy
    /// or a reconfiguration id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capacity: u64,
        refill_tokens: u64,
        refill_period: Duration,
        initial_tokens: u64,
        strategy: RefillStrategy,
        id: Option<u64>,
    ) -> Result<Self, ThrottlerError> {
        let refill_period_nanos = refill_period.as_nanos() as u64;
        if capacity == 0 {
            return Err(ThrottlerError::InvalidArgument(
                "bandwidth capacity must be > 0".into(),
            ));
        }
        if refill_period_nanos == 0 {
            return Err(ThrottlerError::InvalidArgument(
                "bandwidth refill period must be > 0".into(),
            ));
        }
        if refill_tokens == 0 || refill_tokens > capacity {
            return Err(ThrottlerError::InvalidArgument(format!(
                "bandwidth refill_tokens must be in 1..={capacity}, got {refill_tokens}"
            )));
        }
        if initial_tokens > capacity {
            return Err(ThrottlerError::InvalidArgument(format!(
                "bandwidth initial_tokens must be <= capacity {capacity}, got {initial_tokens}"
            )));
        }
        Ok(Self {
            capacity,
            refill_tokens,
            refill_period_nanos,
            initial_tokens,
            strategy,
            id,
        })
    }

    /// A bandwidth that refills smoothly (continuously) up to `capacity`
    /// tokens per `period`, starting full. Equivalent to bucket4j's
    /// `Bandwidth.simple`, which is a greedy, continuously-refilling
    /// bandwidth rather than a discrete-interval one.
    pub fn simple(capacity: u64, period: Duration) -> Result<Self, ThrottlerError> {
        Self::new(
            capacity,
            capacity,
            period,
            capacity,
            RefillStrategy::Smooth,
            None,
        )
    }

    /// A bandwidth with independent capacity, refill rate, and starting
    /// tokens, using smooth (continuous) refill.
    pub fn classic(
        capacity: u64,
        refill_tokens: u64,
        refill_period: Duration,
        initial_tokens: u64,
    ) -> Result<Self, ThrottlerError> {
        Self::new(
            capacity,
            refill_tokens,
            refill_period,
            initial_tokens,
            RefillStrategy::Smooth,
            None,
        )
    }

    /// Returns a copy of this bandwidth tagged with a reconfiguration id.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_tokens(&self) -> u64 {
        self.refill_tokens
    }

    pub fn refill_period_nanos(&self) -> u64 {
        self.refill_period_nanos
    }

    pub fn initial_tokens(&self) -> u64 {
        self.initial_tokens
    }

    pub fn strategy(&self) -> RefillStrategy {
        self.strategy
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Two bandwidths are equivalent for reconfiguration purposes iff both
    /// carry the same `Some` id. A `None` id never matches, even itself.
    pub fn reconfiguration_matches(&self, other: &Bandwidth) -> bool {
        matches!((self.id, other.id), (Some(a), Some(b)) if a == b)
    }
}
