//! # bandwidth-limiter
//!
//! A lock-free, multi-bandwidth token-bucket rate limiter, embeddable
//! directly in a process ([`local_bucket::LocalBucket`]) or backed by a
//! shared grid such as Redis ([`grid::RemoteBucket`]).
//!
//! ## Core Components
//!
//! - **[`bandwidth::Bandwidth`]** - one rate rule (capacity, refill rate, shape)
//! - **[`state::Configuration`]** - an ordered set of bandwidths governing one bucket
//! - **[`algorithm`]** - the pure refill/consumption functions both bucket kinds retry
//! - **[`local_bucket::LocalBucket`]** - in-process state behind a lock-free CAS cell
//! - **[`grid::RemoteBucket`]** - grid-backed state via an [`grid::EntryProcessor`] opcode
//! - **[`bucket::RateLimitedBucket`]** - the trait unifying both, plus blocking `consume`
//!
//! ## Quick Start
//!
//! ```rust
//! use bandwidth_limiter::bandwidth::Bandwidth;
//! use bandwidth_limiter::state::Configuration;
//! use bandwidth_limiter::local_bucket::LocalBucket;
//! use std::time::Duration;
//!
//! let limit = Bandwidth::simple(100, Duration::from_secs(60)).unwrap();
//! let bucket = LocalBucket::new(Configuration::new(vec![limit]).unwrap());
//!
//! if bucket.try_consume(1).unwrap() {
//!     // proceed
//! }
//! ```
//!
//! ## Storage Modes
//!
//! | Mode   | Use Case                         | State Persistence |
//! |--------|-----------------------------------|-------------------|
//! | Local  | Single process, embedded limiting  | In-memory, `ArcSwap` |
//! | Grid   | Shared limiting across processes   | Redis (or any `GridBackend`) |
//!
//! ## Module Organization
//!
//! - [`time`] - monotonic clock abstraction
//! - [`bandwidth`] - one rate rule
//! - [`state`] - mutable bucket state and multi-bandwidth configuration
//! - [`algorithm`] - pure refill/consumption functions
//! - [`local_bucket`] - in-process CAS-guarded bucket
//! - [`grid`] - grid collaborator contract and `RemoteBucket`
//! - [`redis_backend`] - a concrete `GridBackend` over Redis
//! - [`blocking`] - the parking envelope behind `consume`/`consume_uninterruptibly`
//! - [`bucket`] - the `RateLimitedBucket` trait unifying local and remote buckets
//! - [`metrics`] - per-bucket counters
//! - [`config`] - operational settings for grid connectivity
//! - [`error`] - the crate's error type

pub mod algorithm;
pub mod bandwidth;
pub mod blocking;
pub mod bucket;
pub mod config;
pub mod error;
pub mod grid;
pub mod local_bucket;
pub mod metrics;
pub mod redis_backend;
pub mod state;
pub mod time;

pub use bandwidth::Bandwidth;
pub use bucket::RateLimitedBucket;
pub use error::{Result, ThrottlerError};
pub use local_bucket::LocalBucket;
pub use state::Configuration;

/// Version of the bandwidth-limiter library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
