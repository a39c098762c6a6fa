//! Caching layer
//!
//! Cache-aside storage of review snapshots (`review:<id>`) and of the review
//! collection (`reviews:all`). The cache is never the source of truth; every
//! entry can be rebuilt from the store.
//!
//! - [`store`]: in-memory DashMap backend with TTL and eviction
//! - [`review_cache`]: typed fail-open facade with guarded population
//! - [`invalidation`]: apply-time invalidation, local or over NATS

pub mod backend;
pub mod invalidation;
pub mod keys;
pub mod review_cache;
pub mod store;

pub use backend::{CacheBackend, CacheError};
pub use invalidation::{
    spawn_invalidation_listener, CacheInvalidator, InvalidationNotice, NatsInvalidator,
    INVALIDATION_SUBJECT,
};
pub use keys::{CacheKey, ALL_REVIEWS_KEY, REVIEW_KEY_PREFIX};
pub use review_cache::{FillTicket, ReviewCache};
pub use store::{spawn_cleanup_task, CacheEntry, CacheStats, MemoryCache};

use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the memory backend
    pub max_entries: usize,
    /// TTL applied to every entry
    pub ttl: Duration,
    /// Upper bound on a single backend call before it counts as a miss
    pub op_timeout: Duration,
    /// Cleanup interval
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),            // 1 hour
            op_timeout: Duration::from_millis(250),
            cleanup_interval: Duration::from_secs(60), // Run cleanup every minute
        }
    }
}

impl CacheConfig {
    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_entries = std::env::var("CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_entries);

        let ttl = std::env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.ttl);

        let op_timeout = std::env::var("CACHE_OP_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.op_timeout);

        Self {
            max_entries,
            ttl,
            op_timeout,
            cleanup_interval: defaults.cleanup_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    }
}
