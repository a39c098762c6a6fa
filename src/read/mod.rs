//! Read service
//!
//! Authoritative reads on a cache miss. The gateway reaches the store either
//! in-process ([`StoreReadService`]) or over NATS request/reply
//! ([`NatsReadClient`] talking to [`responder::serve`] in the worker).
//!
//! Failures are reported as `Unavailable` or `Timeout`, never as not-found.

pub mod client;
pub mod messages;
pub mod responder;

pub use client::NatsReadClient;
pub use messages::{ReadReply, ReadRequest, READ_GET_SUBJECT, READ_LIST_SUBJECT, READ_QUEUE_GROUP};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::store::ReviewStore;
use crate::types::{GatewayError, Result, Review};

/// Source of truth for reads
#[async_trait::async_trait]
pub trait ReadService: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Review>>;
    async fn get_all(&self) -> Result<Vec<Review>>;
}

/// Read service calling a store in-process
pub struct StoreReadService {
    store: Arc<dyn ReviewStore>,
    timeout: Duration,
}

impl StoreReadService {
    pub fn new(store: Arc<dyn ReviewStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(GatewayError::Timeout(msg))) => Err(GatewayError::Timeout(msg)),
            Ok(Err(e)) => Err(GatewayError::Unavailable(format!("{} failed: {}", op, e))),
            Err(_) => Err(GatewayError::Timeout(format!(
                "{} exceeded {}ms",
                op,
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ReadService for StoreReadService {
    async fn get_by_id(&self, id: &str) -> Result<Option<Review>> {
        self.bounded("get_review", self.store.get_review(id)).await
    }

    async fn get_all(&self) -> Result<Vec<Review>> {
        self.bounded("list_reviews", self.store.list_reviews()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryReviewStore;
    use crate::types::ReviewInput;

    struct SlowStore;

    #[async_trait::async_trait]
    impl ReviewStore for SlowStore {
        async fn get_review(&self, _id: &str) -> Result<Option<Review>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn list_reviews(&self) -> Result<Vec<Review>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
        async fn create_review(&self, _: Option<&str>, _: ReviewInput) -> Result<String> {
            unimplemented!()
        }
        async fn update_review(&self, _: &str, _: ReviewInput) -> Result<bool> {
            unimplemented!()
        }
        async fn delete_review(&self, _: &str) -> Result<bool> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_reads_through_store() {
        let store = Arc::new(MemoryReviewStore::new());
        let id = store
            .create_review(None, ReviewInput::new("alice", 5, "great"))
            .await
            .unwrap();

        let reads = StoreReadService::new(store, Duration::from_secs(1));
        assert_eq!(reads.get_by_id(&id).await.unwrap().unwrap().client, "alice");
        assert_eq!(reads.get_all().await.unwrap().len(), 1);
        assert!(reads.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let store = Arc::new(MemoryReviewStore::new());
        store.fail_next(1);

        let reads = StoreReadService::new(store, Duration::from_secs(1));
        let err = reads.get_all().await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let reads = StoreReadService::new(Arc::new(SlowStore), Duration::from_millis(20));
        let err = reads.get_by_id("x").await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
        assert_eq!(err.status_code(), hyper::StatusCode::GATEWAY_TIMEOUT);
    }
}
