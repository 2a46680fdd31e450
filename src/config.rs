//! # Operational Configuration
//!
//! Settings for the grid-backed half of the crate: where to find it, how
//! long to retry it, and what TTL to stamp on entries. This has nothing to
//! do with bandwidth limits themselves — those are values, built with
//! [`crate::bandwidth::Bandwidth`], not loaded from a file. Grounded on the
//! teacher's `Config::load` layering (file, then environment, then
//! built-in defaults).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub redis_url: String,
    /// TTL applied to a grid entry so an abandoned key doesn't live forever.
    #[serde(with = "humantime_serde")]
    pub entry_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    pub reconnect_max_attempts: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            entry_ttl: Duration::from_secs(3600),
            reconnect_backoff: Duration::from_millis(100),
            reconnect_max_attempts: 5,
        }
    }
}

impl GridConfig {
    /// Loads from `path` (if present), then `BANDWIDTH_LIMITER_*` environment
    /// variables, falling back to [`GridConfig::default`] with a warning if
    /// neither source deserializes cleanly.
    pub fn load(path: &str) -> Self {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("BANDWIDTH_LIMITER"))
            .build();

        let settings = match settings {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(%err, path, "failed to build grid configuration sources, using defaults");
                return Self::default();
            }
        };

        match settings.try_deserialize() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(%err, path, "failed to parse grid configuration, using defaults");
                Self::default()
            }
        }
    }
}
