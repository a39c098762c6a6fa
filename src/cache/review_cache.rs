//! Typed, fail-open cache facade for review snapshots
//!
//! Every backend call is bounded by the configured operation timeout. Errors
//! and timeouts are logged and degrade to a miss (reads) or a no-op (writes),
//! so a broken cache never fails a request.
//!
//! ## Guarded population
//!
//! Invalidations are numbered from one process-wide epoch counter, and the
//! epoch of the latest invalidation is remembered per key. A reader takes a
//! [`FillTicket`] (the current epoch) before it asks the read service, and its
//! later `put_*` only lands if no invalidation of that key happened since.
//! After writing, the key is checked again and the write is undone if an
//! invalidation raced it, so an invalidation is never followed by a fill that
//! started before it.
//!
//! Tickets expire after the fill window. Remembered invalidations older than
//! the window can no longer affect any live ticket and are pruned, which keeps
//! the map bounded by the recent invalidation rate rather than by every id
//! ever invalidated.

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{CacheBackend, CacheConfig, CacheError, CacheKey};
use crate::types::Review;

/// Default bound on read-service call plus cache write
pub const DEFAULT_FILL_WINDOW: Duration = Duration::from_secs(30);

/// Invalidations between two prunes of the invalidation map
const PRUNE_EVERY: u64 = 256;

/// Proof of the epoch a read observed before going to the read service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillTicket {
    key: CacheKey,
    epoch: u64,
    issued_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Invalidation {
    epoch: u64,
    at: Instant,
}

/// Cache of review snapshots and the review collection
pub struct ReviewCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    op_timeout: Duration,
    fill_window: Duration,
    epoch: AtomicU64,
    invalidations: DashMap<String, Invalidation>,
}

impl ReviewCache {
    /// Create a review cache over any backend
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            ttl: config.ttl,
            op_timeout: config.op_timeout,
            fill_window: DEFAULT_FILL_WINDOW,
            epoch: AtomicU64::new(0),
            invalidations: DashMap::new(),
        }
    }

    /// Longest time between taking a ticket and filling with it. Must cover
    /// the read-service timeout plus one cache write; older tickets are refused.
    pub fn with_fill_window(mut self, window: Duration) -> Self {
        self.fill_window = window;
        self
    }

    /// Keys with a remembered invalidation
    pub fn tracked_invalidations(&self) -> usize {
        self.invalidations.len()
    }

    /// Forget invalidations older than the fill window. Returns how many went.
    pub fn prune_invalidations(&self) -> usize {
        let before = self.invalidations.len();
        let window = self.fill_window;
        self.invalidations.retain(|_, inv| inv.at.elapsed() < window);
        let pruned = before.saturating_sub(self.invalidations.len());
        if pruned > 0 {
            debug!(pruned, "Pruned old invalidation records");
        }
        pruned
    }

    /// Cached review by id
    pub async fn get_review(&self, id: &str) -> Option<Review> {
        self.get_json(&CacheKey::review(id)).await
    }

    /// Cached collection. An empty cached list counts as a miss.
    pub async fn get_all(&self) -> Option<Vec<Review>> {
        self.get_json::<Vec<Review>>(&CacheKey::AllReviews)
            .await
            .filter(|reviews| !reviews.is_empty())
    }

    /// Take a ticket before reading from the read service
    pub fn ticket(&self, key: CacheKey) -> FillTicket {
        FillTicket {
            key,
            epoch: self.epoch.load(Ordering::SeqCst),
            issued_at: Instant::now(),
        }
    }

    /// Populate a single review. Returns whether the entry was kept.
    pub async fn put_review(&self, ticket: FillTicket, review: &Review) -> bool {
        self.put_json(ticket, review).await
    }

    /// Populate the collection. Empty collections are never cached.
    pub async fn put_all(&self, ticket: FillTicket, reviews: &[Review]) -> bool {
        if reviews.is_empty() {
            debug!("Refusing to cache an empty review collection");
            return false;
        }
        self.put_json(ticket, &reviews).await
    }

    /// Invalidate one key. Returns whether an entry was present.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let storage_key = key.to_storage_key();
        self.record_invalidation(&storage_key);

        let removed = self
            .guarded("delete", &storage_key, self.backend.delete(&storage_key))
            .await
            .unwrap_or(false);

        if removed {
            info!(key = %storage_key, "Cache entry evicted");
        } else {
            debug!(key = %storage_key, "Cache entry not present on eviction");
        }
        removed
    }

    /// Invalidate everything a write to `review_id` makes stale
    pub async fn invalidate_for(&self, review_id: Option<&str>) {
        for key in CacheKey::affected_by(review_id) {
            self.invalidate(&key).await;
        }
    }

    /// Whether the backend currently holds an entry for `key`
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let storage_key = key.to_storage_key();
        self.guarded("get", &storage_key, self.backend.get(&storage_key))
            .await
            .flatten()
            .is_some()
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let storage_key = key.to_storage_key();
        let bytes = self
            .guarded("get", &storage_key, self.backend.get(&storage_key))
            .await
            .flatten()?;

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = CacheError::Corrupt {
                    key: storage_key.clone(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Dropping unreadable cache entry");
                self.guarded("delete", &storage_key, self.backend.delete(&storage_key))
                    .await;
                None
            }
        }
    }

    async fn put_json<T: Serialize + ?Sized>(&self, ticket: FillTicket, value: &T) -> bool {
        let storage_key = ticket.key.to_storage_key();

        if ticket.issued_at.elapsed() >= self.fill_window {
            debug!(key = %storage_key, "Skipping cache fill, ticket outlived the fill window");
            return false;
        }
        if self.invalidated_since(&storage_key, &ticket) {
            debug!(key = %storage_key, "Skipping cache fill, key invalidated during read");
            return false;
        }

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Failed to serialize cache value");
                return false;
            }
        };

        if self
            .guarded("set", &storage_key, self.backend.set(&storage_key, bytes, self.ttl))
            .await
            .is_none()
        {
            return false;
        }

        if self.invalidated_since(&storage_key, &ticket) {
            // An invalidation raced the write; undo it
            self.guarded("delete", &storage_key, self.backend.delete(&storage_key))
                .await;
            debug!(key = %storage_key, "Cache fill undone, key invalidated during write");
            return false;
        }

        debug!(key = %storage_key, ttl_secs = self.ttl.as_secs(), "Cache fill");
        true
    }

    fn invalidated_since(&self, storage_key: &str, ticket: &FillTicket) -> bool {
        self.invalidations
            .get(storage_key)
            .is_some_and(|inv| inv.epoch > ticket.epoch)
    }

    fn record_invalidation(&self, storage_key: &str) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.invalidations.insert(
            storage_key.to_string(),
            Invalidation {
                epoch,
                at: Instant::now(),
            },
        );

        if epoch % PRUNE_EVERY == 0 {
            self.prune_invalidations();
        }
    }

    /// Run a backend call with the operation timeout, logging failures
    async fn guarded<T, F>(&self, op: &'static str, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(key, op, error = %e, "Cache backend error, continuing without cache");
                None
            }
            Err(_) => {
                warn!(
                    key,
                    op,
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "Cache backend timed out, continuing without cache"
                );
                None
            }
        }
    }
}
