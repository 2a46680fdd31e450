//! # Error Types
//!
//! A single error enum for all bucket operations, covering both local and
//! remote (grid) buckets. See spec.md §7 for the kind-by-kind rationale.

use thiserror::Error;

/// All errors a bucket operation can surface.
///
/// CAS contention is intentionally absent from this enum: it is invisible
/// looping inside `local_bucket`/`grid`, never observed by callers.
#[derive(Debug, Error, Clone)]
pub enum ThrottlerError {
    /// `n <= 0`, a negative/overflowing time, or a bandwidth whose fields
    /// violate their constructor invariants.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote bucket's entry was missing and its recovery strategy is
    /// `RecoveryStrategy::Throw`.
    #[error("bucket not found for key {0:?}")]
    BucketNotFound(String),

    /// A blocking `consume` was interrupted while parked. Tokens already
    /// reserved remain debited; the library performs no compensation.
    #[error("interrupted while waiting for tokens")]
    InterruptedWait,

    /// The grid backend itself failed (network, serialization, ...). Passed
    /// through unchanged; the library never retries this on the caller's
    /// behalf.
    #[error("grid backend failure: {0}")]
    GridFailure(String),

    /// Installing a new configuration whose bandwidth-id set cannot be
    /// unambiguously mapped onto the current state (duplicate ids within one
    /// configuration, for example).
    #[error("reconfiguration conflict: {0}")]
    ReconfigureConflict(String),
}

pub type Result<T> = std::result::Result<T, ThrottlerError>;

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlerError::GridFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ThrottlerError {
    fn from(err: serde_json::Error) -> Self {
        ThrottlerError::GridFailure(format!("serialization failure: {err}"))
    }
}
