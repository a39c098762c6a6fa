//! Review document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::types::{Review, ReviewInput};

/// Default collection name for reviews
pub const REVIEW_COLLECTION: &str = "reviews";

/// Review document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReviewDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    pub client: String,

    pub rating: i32,

    pub comment: String,

    /// Command id of the create that inserted this document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// Set when a review created with a correlation id is deleted. The
    /// document stays behind so a redelivered create cannot revive it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,
}

impl ReviewDoc {
    /// New document for an insert
    pub fn from_input(input: ReviewInput, correlation_id: Option<String>) -> Self {
        Self {
            _id: None,
            client: input.client,
            rating: input.rating,
            comment: input.comment,
            correlation_id,
            created_at: Some(DateTime::now()),
            updated_at: None,
            deleted_at: None,
        }
    }

    /// Narrow `filter` to documents that have not been deleted
    pub fn live(mut filter: Document) -> Document {
        filter.insert("deleted_at", doc! { "$exists": false });
        filter
    }

    /// Filter for a live document that must be kept as a tombstone on delete
    pub fn tombstone_filter(id: ObjectId) -> Document {
        Self::live(doc! { "_id": id, "correlation_id": { "$exists": true } })
    }

    /// Update turning a document into a tombstone
    pub fn tombstone() -> Document {
        doc! { "$set": { "deleted_at": DateTime::now() } }
    }

    /// `$set` body overwriting the mutable fields
    pub fn overwrite(input: &ReviewInput) -> Document {
        doc! {
            "$set": {
                "client": &input.client,
                "rating": input.rating,
                "comment": &input.comment,
                "updated_at": DateTime::now(),
            }
        }
    }

    /// Convert to the API type; tombstones and documents without an id are skipped
    pub fn into_review(self) -> Option<Review> {
        if self.deleted_at.is_some() {
            return None;
        }
        let id = self._id?;
        Some(Review {
            id: id.to_hex(),
            client: self.client,
            rating: self.rating,
            comment: self.comment,
        })
    }
}

impl IntoIndexes for ReviewDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Idempotent creates: one document per command id
            (
                doc! { "correlation_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .name("correlation_id_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_review_uses_hex_id() {
        let oid = ObjectId::new();
        let doc = ReviewDoc {
            _id: Some(oid),
            ..ReviewDoc::from_input(ReviewInput::new("alice", 5, "great"), None)
        };

        let review = doc.into_review().unwrap();
        assert_eq!(review.id, oid.to_hex());
        assert_eq!(review.client, "alice");
    }

    #[test]
    fn test_correlation_omitted_when_absent() {
        let doc = ReviewDoc::from_input(ReviewInput::new("a", 1, "b"), None);
        let bson = bson::to_document(&doc).unwrap();
        assert!(!bson.contains_key("correlation_id"));
        assert!(!bson.contains_key("_id"));
    }

    #[test]
    fn test_tombstone_is_hidden() {
        let doc = ReviewDoc {
            _id: Some(ObjectId::new()),
            deleted_at: Some(DateTime::now()),
            ..ReviewDoc::from_input(ReviewInput::new("a", 1, "b"), Some("cmd-1".into()))
        };
        assert!(doc.into_review().is_none());
    }

    #[test]
    fn test_live_filter_excludes_tombstones() {
        let oid = ObjectId::new();
        let filter = ReviewDoc::live(doc! { "_id": oid });
        assert_eq!(filter.get_object_id("_id").unwrap(), oid);
        let deleted = filter.get_document("deleted_at").unwrap();
        assert!(!deleted.get_bool("$exists").unwrap());

        let tombstone = ReviewDoc::tombstone_filter(oid);
        assert!(tombstone.contains_key("correlation_id"));
        assert!(tombstone.contains_key("deleted_at"));
        assert!(ReviewDoc::tombstone()
            .get_document("$set")
            .unwrap()
            .contains_key("deleted_at"));
    }

    #[test]
    fn test_overwrite_keeps_correlation() {
        let update = ReviewDoc::overwrite(&ReviewInput::new("a", 2, "c"));
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_i32("rating").unwrap(), 2);
        assert!(!set.contains_key("correlation_id"));
    }
}
