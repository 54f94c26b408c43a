use bson::{Document, doc, oid::ObjectId};
use futures::TryStreamExt;
use mongodb::{
    Collection, Database,
    error::{ErrorKind, WriteFailure},
    options::{ReturnDocument, UpdateModifications},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("BSON serialization error: {0}")]
    BsonSer(#[from] bson::ser::Error),
    #[error("BSON deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),
    #[error("Entity not found")]
    NotFound,
    #[error("Write conflict: {0}")]
    Conflict(String),
}

pub type DaoResult<T> = Result<T, DaoError>;

const DUPLICATE_KEY: i32 = 11000;

/// Thin typed wrapper over a MongoDB collection.
pub struct BaseDao<T: Send + Sync> {
    collection: Collection<T>,
}

impl<T> BaseDao<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Unpin + Send + Sync,
{
    pub fn new(db: &Database, collection_name: &str) -> Self {
        Self {
            collection: db.collection::<T>(collection_name),
        }
    }

    pub async fn find_one(&self, filter: Document) -> DaoResult<Option<T>> {
        Ok(self.collection.find_one(filter).await?)
    }

    pub async fn find_many(&self, filter: Document, sort: Option<Document>) -> DaoResult<Vec<T>> {
        let mut cursor = match sort {
            Some(sort) => self.collection.find(filter).sort(sort).await?,
            None => self.collection.find(filter).await?,
        };

        let mut results = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            results.push(doc);
        }
        Ok(results)
    }

    pub async fn insert_one(&self, doc: &T) -> DaoResult<ObjectId> {
        let result = self
            .collection
            .insert_one(doc)
            .await
            .map_err(map_duplicate_key)?;

        let id = result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| DaoError::Conflict("inserted_id is not an ObjectId".to_string()))?;
        debug!(?id, "Inserted document");
        Ok(id)
    }

    /// Applies `update` and returns the document as it is after the write.
    pub async fn update_and_fetch(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> DaoResult<T> {
        self.collection
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or(DaoError::NotFound)
    }

    /// Replaces the document matching `filter`, inserting it when absent.
    /// A unique-key collision on insert is reported as `Conflict`.
    pub async fn replace_or_insert(&self, filter: Document, doc: &T) -> DaoResult<()> {
        self.collection
            .replace_one(filter, doc)
            .upsert(true)
            .await
            .map_err(map_duplicate_key)?;
        Ok(())
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> DaoResult<u64> {
        let result = self.collection.update_many(filter, update).await?;
        Ok(result.modified_count)
    }

    pub async fn distinct_ids(&self, field: &str, filter: Document) -> DaoResult<Vec<ObjectId>> {
        let values = self.collection.distinct(field, filter).await?;
        Ok(values.iter().filter_map(|v| v.as_object_id()).collect())
    }
}

fn map_duplicate_key(e: mongodb::error::Error) -> DaoError {
    if let ErrorKind::Write(WriteFailure::WriteError(ref write_error)) = *e.kind {
        if write_error.code == DUPLICATE_KEY {
            return DaoError::Conflict(write_error.message.clone());
        }
    }
    DaoError::Mongo(e)
}

/// Filter selecting a camera inside its event.
pub fn camera_filter(event_id: ObjectId, camera_id: ObjectId) -> Document {
    doc! { "_id": camera_id, "event_id": event_id }
}
