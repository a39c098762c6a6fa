//! MongoDB client and typed collection wrapper

use bson::{doc, oid::ObjectId, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::{
        ClientOptions, FindOneAndUpdateOptions, IndexOptions, ReturnDocument, UpdateModifications,
    },
    results::{DeleteResult, UpdateResult},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::types::GatewayError;

/// Fail fast when the server is unreachable instead of the driver's 30s default
const SELECTION_TIMEOUT: Duration = Duration::from_secs(3);

fn db_err(action: &str) -> impl Fn(mongodb::error::Error) -> GatewayError + '_ {
    move |e| GatewayError::Database(format!("{action} failed: {e}"))
}

/// Schemas declare their indexes; they are created when the collection opens
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Connected client bound to one database
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping. Errors if the server cannot be selected in time.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, GatewayError> {
        let mut options = ClientOptions::parse(uri).await.map_err(db_err("Parsing MongoDB URI"))?;
        options.server_selection_timeout.get_or_insert(SELECTION_TIMEOUT);
        options.connect_timeout.get_or_insert(SELECTION_TIMEOUT);
        options.app_name.get_or_insert_with(|| "review-gateway".to_string());

        let client = Client::with_options(options).map_err(db_err("MongoDB connect"))?;
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(db_err("MongoDB ping"))?;

        info!(db = db_name, "Connected to MongoDB");
        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open a typed collection, creating its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, GatewayError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        let inner = self.client.database(&self.db_name).collection::<T>(name);
        let collection = MongoCollection { inner };
        collection.apply_indexes().await?;
        Ok(collection)
    }
}

/// Typed collection; every driver error becomes [`GatewayError::Database`]
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    async fn apply_indexes(&self) -> Result<(), GatewayError> {
        let models: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, options)| IndexModel::builder().keys(keys).options(options).build())
            .collect();
        if models.is_empty() {
            return Ok(());
        }

        let count = models.len();
        self.inner
            .create_indexes(models)
            .await
            .map_err(db_err("Creating indexes"))?;
        debug!(collection = self.inner.name(), count, "Indexes ensured");
        Ok(())
    }

    pub async fn insert_one(&self, item: T) -> Result<ObjectId, GatewayError> {
        self.inner
            .insert_one(item)
            .await
            .map_err(db_err("Insert"))?
            .inserted_id
            .as_object_id()
            .ok_or_else(|| GatewayError::Database("Insert returned a non-ObjectId _id".into()))
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, GatewayError> {
        self.inner.find_one(filter).await.map_err(db_err("Find"))
    }

    /// All matches in `_id` order, which for ObjectIds is insertion order
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, GatewayError> {
        self.inner
            .find(filter)
            .sort(doc! { "_id": 1 })
            .await
            .map_err(db_err("Find"))?
            .try_collect()
            .await
            .map_err(db_err("Reading cursor"))
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, GatewayError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(db_err("Update"))
    }

    /// Apply `update` to the match for `filter`, inserting one if none exists.
    /// Returns the document as stored afterwards.
    pub async fn upsert_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<Option<T>, GatewayError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        self.inner
            .find_one_and_update(filter, update.into())
            .with_options(options)
            .await
            .map_err(db_err("Upsert"))
    }

    pub async fn delete_one(&self, filter: Document) -> Result<DeleteResult, GatewayError> {
        self.inner
            .delete_one(filter)
            .await
            .map_err(db_err("Delete"))
    }
}
