//! MongoDB-backed review store

use bson::{doc, oid::ObjectId, DateTime};
use tracing::{debug, warn};

use super::ReviewStore;
use crate::db::schemas::ReviewDoc;
use crate::db::{MongoClient, MongoCollection};
use crate::types::{GatewayError, Result, Review, ReviewInput};

/// Review store on a MongoDB collection
#[derive(Clone)]
pub struct MongoReviewStore {
    collection: MongoCollection<ReviewDoc>,
}

impl MongoReviewStore {
    pub async fn new(client: &MongoClient, collection: &str) -> Result<Self> {
        Ok(Self {
            collection: client.collection::<ReviewDoc>(collection).await?,
        })
    }

    async fn find_by_correlation(&self, correlation: &str) -> Result<Option<String>> {
        let found = self
            .collection
            .find_one(doc! { "correlation_id": correlation })
            .await?;
        Ok(found.and_then(|d| d._id).map(|id| id.to_hex()))
    }
}

/// Ids are ObjectIds; anything else cannot match a document
fn parse_id(id: &str) -> Option<ObjectId> {
    ObjectId::parse_str(id).ok()
}

#[async_trait::async_trait]
impl ReviewStore for MongoReviewStore {
    async fn get_review(&self, id: &str) -> Result<Option<Review>> {
        let Some(oid) = parse_id(id) else {
            return Ok(None);
        };

        let doc = self
            .collection
            .find_one(ReviewDoc::live(doc! { "_id": oid }))
            .await?;
        Ok(doc.and_then(ReviewDoc::into_review))
    }

    async fn list_reviews(&self) -> Result<Vec<Review>> {
        let docs = self.collection.find_many(ReviewDoc::live(doc! {})).await?;
        Ok(docs.into_iter().filter_map(ReviewDoc::into_review).collect())
    }

    async fn create_review(&self, correlation: Option<&str>, input: ReviewInput) -> Result<String> {
        let Some(correlation) = correlation else {
            let id = self
                .collection
                .insert_one(ReviewDoc::from_input(input, None))
                .await?;
            return Ok(id.to_hex());
        };

        let update = doc! {
            "$setOnInsert": {
                "client": &input.client,
                "rating": input.rating,
                "comment": &input.comment,
                "correlation_id": correlation,
                "created_at": DateTime::now(),
            }
        };

        match self
            .collection
            .upsert_one(doc! { "correlation_id": correlation }, update)
            .await
        {
            Ok(Some(doc)) => doc
                ._id
                .map(|id| id.to_hex())
                .ok_or_else(|| GatewayError::Database("Upsert returned no id".into())),
            Ok(None) => Err(GatewayError::Database("Upsert returned no document".into())),
            Err(e) => {
                // Two concurrent upserts can race on the unique index; the
                // loser finds the winner's document.
                warn!(correlation, error = %e, "Upsert failed, looking up existing create");
                match self.find_by_correlation(correlation).await? {
                    Some(id) => {
                        debug!(review_id = %id, "Duplicate create resolved");
                        Ok(id)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn update_review(&self, id: &str, input: ReviewInput) -> Result<bool> {
        let Some(oid) = parse_id(id) else {
            return Ok(false);
        };

        let result = self
            .collection
            .update_one(ReviewDoc::live(doc! { "_id": oid }), ReviewDoc::overwrite(&input))
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_review(&self, id: &str) -> Result<bool> {
        let Some(oid) = parse_id(id) else {
            return Ok(false);
        };

        // Created with a correlation id: keep a tombstone so the id stays deduplicated
        let tombstoned = self
            .collection
            .update_one(ReviewDoc::tombstone_filter(oid), ReviewDoc::tombstone())
            .await?;
        if tombstoned.matched_count > 0 {
            return Ok(true);
        }

        let result = self
            .collection
            .delete_one(doc! { "_id": oid, "correlation_id": { "$exists": false } })
            .await?;
        Ok(result.deleted_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let oid = ObjectId::new();
        assert_eq!(parse_id(&oid.to_hex()), Some(oid));
        assert_eq!(parse_id("not-an-object-id"), None);
        assert_eq!(parse_id(""), None);
    }
}
