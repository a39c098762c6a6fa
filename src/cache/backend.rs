//! Cache backend abstraction
//!
//! Backends store opaque bytes under string keys with a TTL. They may be
//! remote and may fail; callers go through [`ReviewCache`](super::ReviewCache),
//! which turns every failure into a miss.

use std::time::Duration;
use thiserror::Error;

/// Error types for cache backend operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend could not be reached
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be decoded
    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Key-value store with per-write TTL
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a live entry
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store an entry, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove an entry, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}
