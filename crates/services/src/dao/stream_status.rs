use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use livecast_db::models::StreamStatus;
use mongodb::Database;

use crate::store::StatusStore;
use super::base::{BaseDao, DaoResult};

pub struct StreamStatusDao {
    pub base: BaseDao<StreamStatus>,
}

impl StreamStatusDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, StreamStatus::COLLECTION),
        }
    }
}

#[async_trait]
impl StatusStore for StreamStatusDao {
    async fn get(&self, event_id: ObjectId) -> DaoResult<Option<StreamStatus>> {
        self.base.find_one(doc! { "event_id": event_id }).await
    }

    async fn upsert(&self, status: &StreamStatus, expected_revision: i64) -> DaoResult<()> {
        // A revision mismatch makes the upsert try an insert, which the
        // unique event_id index turns into a Conflict.
        self.base
            .replace_or_insert(
                doc! { "event_id": status.event_id, "revision": expected_revision },
                status,
            )
            .await
    }

    async fn live_event_ids(&self) -> DaoResult<Vec<ObjectId>> {
        self.base
            .distinct_ids("event_id", doc! { "is_live": true })
            .await
    }
}
