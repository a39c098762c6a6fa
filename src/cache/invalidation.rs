//! Apply-time cache invalidation
//!
//! The gateway invalidates when it accepts a write, but the write lands later.
//! A read in between repopulates the cache with pre-write data, so the
//! processor invalidates again once the command is applied. In-process the
//! processor talks to the [`ReviewCache`] directly; across processes it
//! publishes an [`InvalidationNotice`] that every gateway applies.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ReviewCache;
use crate::nats::NatsClient;
use crate::types::Result;

/// Subject carrying invalidation notices
pub const INVALIDATION_SUBJECT: &str = "review.cache.invalidate";

/// Notice that a command has been applied to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationNotice {
    /// Review touched by the command (None for creates)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,

    /// Command that was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<Uuid>,

    /// Worker that applied it
    pub origin: String,
}

impl InvalidationNotice {
    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> std::result::Result<bytes::Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Into::into)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Invalidation performed after a command has been applied
#[async_trait::async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Drop every entry made stale by a write to `review_id`.
    /// Must not fail: a lost invalidation only extends staleness up to the TTL.
    async fn invalidate_applied(&self, review_id: Option<&str>, command_id: Option<Uuid>);
}

#[async_trait::async_trait]
impl CacheInvalidator for ReviewCache {
    async fn invalidate_applied(&self, review_id: Option<&str>, command_id: Option<Uuid>) {
        debug!(review_id, command_id = ?command_id, "Apply-time invalidation");
        self.invalidate_for(review_id).await;
    }
}

/// Publishes invalidation notices for remote gateways
pub struct NatsInvalidator {
    nats: NatsClient,
    origin: String,
}

impl NatsInvalidator {
    pub fn new(nats: NatsClient, origin: impl Into<String>) -> Self {
        Self {
            nats,
            origin: origin.into(),
        }
    }
}

#[async_trait::async_trait]
impl CacheInvalidator for NatsInvalidator {
    async fn invalidate_applied(&self, review_id: Option<&str>, command_id: Option<Uuid>) {
        let notice = InvalidationNotice {
            review_id: review_id.map(str::to_string),
            command_id,
            origin: self.origin.clone(),
        };

        let payload = match notice.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize invalidation notice");
                return;
            }
        };

        if let Err(e) = self.nats.publish(INVALIDATION_SUBJECT, payload).await {
            warn!(
                review_id,
                error = %e,
                "Failed to publish invalidation notice, entries stay until TTL"
            );
        }
    }
}

/// Subscribe to invalidation notices and apply them to the local cache
pub async fn spawn_invalidation_listener(
    nats: &NatsClient,
    cache: Arc<ReviewCache>,
) -> Result<JoinHandle<()>> {
    let mut subscriber = nats.subscribe(INVALIDATION_SUBJECT).await?;
    info!("Listening for cache invalidations on {}", INVALIDATION_SUBJECT);

    Ok(tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            match InvalidationNotice::from_bytes(&msg.payload) {
                Ok(notice) => {
                    debug!(
                        review_id = notice.review_id.as_deref(),
                        origin = %notice.origin,
                        "Received invalidation notice"
                    );
                    cache
                        .invalidate_applied(notice.review_id.as_deref(), notice.command_id)
                        .await;
                }
                Err(e) => warn!(error = %e, "Ignoring malformed invalidation notice"),
            }
        }
        warn!("Invalidation subscription closed");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheKey, MemoryCache};
    use crate::types::Review;

    #[test]
    fn test_notice_roundtrip_without_review() {
        let notice = InvalidationNotice {
            review_id: None,
            command_id: None,
            origin: "worker-1".into(),
        };
        let bytes = notice.to_bytes().unwrap();
        assert_eq!(&bytes[..], br#"{"origin":"worker-1"}"#);
        assert_eq!(InvalidationNotice::from_bytes(&bytes).unwrap(), notice);
    }

    #[tokio::test]
    async fn test_review_cache_invalidator_clears_both_keys() {
        let backend = Arc::new(MemoryCache::with_defaults());
        let cache = ReviewCache::new(backend.clone(), &CacheConfig::default());
        let review = Review {
            id: "r1".into(),
            client: "a".into(),
            rating: 1,
            comment: "c".into(),
        };

        cache
            .put_review(cache.ticket(CacheKey::review("r1")), &review)
            .await;
        cache
            .put_all(cache.ticket(CacheKey::AllReviews), &[review.clone()])
            .await;

        cache.invalidate_applied(Some("r1"), None).await;

        assert!(!backend.contains("review:r1"));
        assert!(!backend.contains("reviews:all"));
    }
}
