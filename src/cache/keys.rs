//! Cache key definitions
//!
//! Two namespaces: one entry per review (`review:<id>`) and a single entry for
//! the whole collection (`reviews:all`).

use std::fmt;

/// Prefix for single-review entries
pub const REVIEW_KEY_PREFIX: &str = "review:";

/// Key of the full collection entry
pub const ALL_REVIEWS_KEY: &str = "reviews:all";

/// Cache key for review snapshots
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single review by id
    Review(String),
    /// The "all reviews" collection
    AllReviews,
}

impl CacheKey {
    /// Key for a single review
    pub fn review(id: &str) -> Self {
        Self::Review(id.to_string())
    }

    /// Convert to storage key string
    pub fn to_storage_key(&self) -> String {
        match self {
            Self::Review(id) => format!("{}{}", REVIEW_KEY_PREFIX, id),
            Self::AllReviews => ALL_REVIEWS_KEY.to_string(),
        }
    }

    /// Keys a write to `review_id` makes stale (creates only touch the collection)
    pub fn affected_by(review_id: Option<&str>) -> Vec<Self> {
        match review_id {
            Some(id) => vec![Self::review(id), Self::AllReviews],
            None => vec![Self::AllReviews],
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_key())
    }
}
