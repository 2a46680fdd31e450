//! # Bucket State
//!
//! [`BucketState`] is the mutable, snapshotable value the algorithm operates
//! on: one `(current_tokens, last_refill_nanos)` pair per bandwidth in a
//! [`Configuration`]. It is copied wholesale on every update (see
//! `local_bucket`'s CAS loop), which is what makes it safe to share across an
//! `ArcSwap` or ship across a process boundary as a [`GridBucketState`].

use crate::bandwidth::Bandwidth;
use crate::error::ThrottlerError;
use serde::{Deserialize, Serialize};

/// Per-bandwidth mutable counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthState {
    /// Current token count. Normally `0..=capacity`, but a reservation
    /// (`algorithm::try_consume_and_reserve`) may drive this negative
    /// transiently — see spec.md §8 invariant 1.
    pub current_tokens: i64,
    pub last_refill_nanos: u64,
    /// Sub-token remainder retained by smooth refill so repeated refills
    /// never drift (spec.md §4.2). Unused by intervally bandwidths.
    pub rounding_error_nanos: u64,
}

impl BandwidthState {
    pub fn new(bandwidth: &Bandwidth, now_nanos: u64) -> Self {
        Self {
            current_tokens: bandwidth.initial_tokens() as i64,
            last_refill_nanos: now_nanos,
            rounding_error_nanos: 0,
        }
    }
}

/// The full mutable state of a bucket: one [`BandwidthState`] per bandwidth
/// in its [`Configuration`], in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    pub bandwidths: Vec<BandwidthState>,
}

impl BucketState {
    pub fn new(configuration: &Configuration, now_nanos: u64) -> Self {
        Self {
            bandwidths: configuration
                .bandwidths()
                .iter()
                .map(|b| BandwidthState::new(b, now_nanos))
                .collect(),
        }
    }

    /// The bucket-wide available tokens after refill: the minimum across all
    /// bandwidths, floored at zero (a bandwidth mid-reservation can be
    /// negative; it is never reported as "available").
    pub fn min_available_tokens(&self) -> u64 {
        self.bandwidths
            .iter()
            .map(|b| b.current_tokens.max(0) as u64)
            .min()
            .unwrap_or(0)
    }
}

/// An ordered, non-empty list of [`Bandwidth`]s. The effective limit at any
/// moment is the most restrictive bandwidth in the list (spec.md §3); every
/// successful consumption debits all of them by the same amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    bandwidths: Vec<Bandwidth>,
}

impl Configuration {
    pub fn new(bandwidths: Vec<Bandwidth>) -> Result<Self, ThrottlerError> {
        if bandwidths.is_empty() {
            return Err(ThrottlerError::InvalidArgument(
                "configuration must have at least one bandwidth".into(),
            ));
        }
        let mut seen_ids = Vec::new();
        for b in &bandwidths {
            if let Some(id) = b.id() {
                if seen_ids.contains(&id) {
                    return Err(ThrottlerError::ReconfigureConflict(format!(
                        "duplicate bandwidth id {id} within one configuration"
                    )));
                }
                seen_ids.push(id);
            }
        }
        Ok(Self { bandwidths })
    }

    pub fn bandwidths(&self) -> &[Bandwidth] {
        &self.bandwidths
    }

    /// Smallest capacity across all bandwidths — a request for more than
    /// this can never be satisfied (spec.md §4.3 edge case).
    pub fn min_capacity(&self) -> u64 {
        self.bandwidths.iter().map(Bandwidth::capacity).min().unwrap_or(0)
    }

    /// Produces the state for a new configuration, carrying forward token
    /// counts from `old_state`/`self` for bandwidths whose ids match
    /// (spec.md §3's "reconfiguration produces a new state of the new size").
    /// Bandwidths with no matching id (including any with `id: None`) seed at
    /// their own `initial_tokens`.
    pub fn reconfigure(
        &self,
        old_state: &BucketState,
        new_configuration: &Configuration,
        now_nanos: u64,
    ) -> BucketState {
        let new_bandwidths = new_configuration
            .bandwidths()
            .iter()
            .map(|new_b| {
                let carried = self
                    .bandwidths
                    .iter()
                    .zip(old_state.bandwidths.iter())
                    .find(|(old_b, _)| old_b.reconfiguration_matches(new_b))
                    .map(|(_, old_state)| BandwidthState {
                        current_tokens: old_state.current_tokens.min(new_b.capacity() as i64),
                        last_refill_nanos: old_state.last_refill_nanos,
                        rounding_error_nanos: old_state.rounding_error_nanos,
                    });
                carried.unwrap_or_else(|| BandwidthState::new(new_b, now_nanos))
            })
            .collect();
        BucketState {
            bandwidths: new_bandwidths,
        }
    }
}

/// The current schema version for [`GridBucketState`]'s wire format. Bumped
/// whenever the on-wire layout changes incompatibly; `redis_backend` refuses
/// to decode a state carrying an unrecognized version rather than guessing.
pub const GRID_STATE_SCHEMA_VERSION: u8 = 1;

/// A [`BucketState`] bundled with the [`Configuration`] that produced it, as
/// transmitted to and from a remote grid cache entry (spec.md §3). The
/// configuration travels with the state because the remote executor is
/// stateless and must know the rules to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBucketState {
    pub schema_version: u8,
    pub configuration: Configuration,
    pub state: BucketState,
}

impl GridBucketState {
    pub fn new(configuration: Configuration, state: BucketState) -> Self {
        Self {
            schema_version: GRID_STATE_SCHEMA_VERSION,
            configuration,
            state,
        }
    }

    pub fn fresh(configuration: Configuration, now_nanos: u64) -> Self {
        let state = BucketState::new(&configuration, now_nanos);
        Self::new(configuration, state)
    }
}
