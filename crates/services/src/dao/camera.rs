use async_trait::async_trait;
use bson::{DateTime, Document, doc, oid::ObjectId};
use livecast_db::models::{CameraConnection, CameraStatus};
use mongodb::Database;

use crate::store::{CameraStore, StaleCamera, StatusUpdate};
use super::base::{BaseDao, DaoResult, camera_filter};

pub struct CameraDao {
    pub base: BaseDao<CameraConnection>,
}

impl CameraDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, CameraConnection::COLLECTION),
        }
    }
}

fn reporting_filter() -> Document {
    doc! {
        "status": {
            "$in": [CameraStatus::Connecting.as_str(), CameraStatus::Active.as_str()]
        }
    }
}

/// `$set` stage keeping an existing `disconnected_at`.
fn stamp_disconnect(set: &mut Document, at: DateTime) {
    set.insert(
        "disconnected_at",
        doc! { "$ifNull": ["$disconnected_at", at] },
    );
}

#[async_trait]
impl CameraStore for CameraDao {
    async fn insert(&self, mut camera: CameraConnection) -> DaoResult<CameraConnection> {
        let id = self.base.insert_one(&camera).await?;
        camera.id = Some(id);
        Ok(camera)
    }

    async fn find(&self, event_id: ObjectId, camera_id: ObjectId) -> DaoResult<CameraConnection> {
        self.base
            .find_one(camera_filter(event_id, camera_id))
            .await?
            .ok_or(super::DaoError::NotFound)
    }

    async fn list_by_event(&self, event_id: ObjectId) -> DaoResult<Vec<CameraConnection>> {
        self.base
            .find_many(
                doc! { "event_id": event_id },
                Some(doc! { "joined_at": -1 }),
            )
            .await
    }

    async fn update_status(
        &self,
        event_id: ObjectId,
        camera_id: ObjectId,
        update: &StatusUpdate,
    ) -> DaoResult<CameraConnection> {
        let mut set = doc! {
            "status": update.status.as_str(),
            "last_active_at": update.at,
            "updated_at": update.at,
        };
        if let Some(quality) = &update.stream_quality {
            // $literal so codec strings are never read as field paths
            set.insert(
                "stream_quality",
                doc! { "$literal": bson::to_bson(quality)? },
            );
        }
        if update.status.is_terminal() {
            stamp_disconnect(&mut set, update.at);
        }

        self.base
            .update_and_fetch(camera_filter(event_id, camera_id), vec![doc! { "$set": set }])
            .await
    }

    async fn mark_stale(&self, cutoff: DateTime, now: DateTime) -> DaoResult<Vec<StaleCamera>> {
        let mut filter = reporting_filter();
        filter.insert("last_active_at", doc! { "$lt": cutoff });

        let quiet = self.base.find_many(filter.clone(), None).await?;
        if quiet.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ObjectId> = quiet.iter().filter_map(|c| c.id).collect();
        filter.insert("_id", doc! { "$in": ids });

        let mut set = doc! {
            "status": CameraStatus::Inactive.as_str(),
            "updated_at": now,
        };
        stamp_disconnect(&mut set, now);
        self.base
            .update_many(filter, vec![doc! { "$set": set }])
            .await?;

        Ok(quiet
            .into_iter()
            .filter_map(|c| {
                c.id.map(|camera_id| StaleCamera {
                    event_id: c.event_id,
                    camera_id,
                })
            })
            .collect())
    }
}
