//! Review persistence
//!
//! The store is the source of truth. The processor writes through it, the read
//! service reads from it. Conflicting mutations are serialized by the store
//! itself; callers do not lock ids.

pub mod memory;
pub mod mongo;

pub use memory::MemoryReviewStore;
pub use mongo::MongoReviewStore;

use crate::types::{Result, Review, ReviewInput};

/// Durable review storage
#[async_trait::async_trait]
pub trait ReviewStore: Send + Sync {
    /// Fetch one review; `None` when absent or when `id` is not a valid id
    async fn get_review(&self, id: &str) -> Result<Option<Review>>;

    /// All reviews in insertion order
    async fn list_reviews(&self) -> Result<Vec<Review>>;

    /// Insert a review and return its id.
    ///
    /// With a `correlation` token, a second create carrying the same token
    /// returns the id of the first instead of inserting again. This holds
    /// after the first review was deleted: the token is remembered and the
    /// review stays deleted.
    async fn create_review(&self, correlation: Option<&str>, input: ReviewInput) -> Result<String>;

    /// Overwrite an existing review. Returns false (and writes nothing) when
    /// the id does not exist.
    async fn update_review(&self, id: &str, input: ReviewInput) -> Result<bool>;

    /// Remove a review. Returns false when the id does not exist.
    async fn delete_review(&self, id: &str) -> Result<bool>;
}
