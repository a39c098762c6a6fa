//! In-memory review store for dev mode and tests

use bson::oid::ObjectId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::ReviewStore;
use crate::types::{GatewayError, Result, Review, ReviewInput};

#[derive(Default)]
struct Inner {
    reviews: Vec<Review>,
    by_correlation: HashMap<String, String>,
}

/// Review store held in process memory
#[derive(Default)]
pub struct MemoryReviewStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
    fail_next: AtomicU32,
    mutations: AtomicU64,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Fail the next `n` calls
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Relaxed);
    }

    /// Number of mutations that changed stored data
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.reviews.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(GatewayError::Unavailable("memory store offline".into()));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(GatewayError::Database("injected store failure".into()));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn get_review(&self, id: &str) -> Result<Option<Review>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.reviews.iter().find(|r| r.id == id).cloned())
    }

    async fn list_reviews(&self) -> Result<Vec<Review>> {
        self.check_available()?;
        Ok(self.inner.read().await.reviews.clone())
    }

    async fn create_review(&self, correlation: Option<&str>, input: ReviewInput) -> Result<String> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        if let Some(existing) = correlation.and_then(|c| inner.by_correlation.get(c)) {
            debug!(review_id = %existing, "Duplicate create ignored");
            return Ok(existing.clone());
        }

        let id = ObjectId::new().to_hex();
        inner.reviews.push(Review::from_input(id.clone(), input));
        if let Some(correlation) = correlation {
            inner
                .by_correlation
                .insert(correlation.to_string(), id.clone());
        }

        self.mutations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn update_review(&self, id: &str, input: ReviewInput) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        match inner.reviews.iter_mut().find(|r| r.id == id) {
            Some(review) => {
                *review = Review::from_input(id, input);
                self.mutations.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_review(&self, id: &str) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        let before = inner.reviews.len();
        inner.reviews.retain(|r| r.id != id);
        let removed = inner.reviews.len() != before;

        if removed {
            self.mutations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }
}
