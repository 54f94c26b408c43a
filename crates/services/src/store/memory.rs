use async_trait::async_trait;
use bson::{DateTime, oid::ObjectId};
use dashmap::{DashMap, mapref::entry::Entry};
use livecast_db::models::{CameraConnection, CameraStatus, StreamStatus};

use crate::dao::{DaoError, DaoResult};
use super::{CameraStore, StaleCamera, StatusStore, StatusUpdate, apply_update, is_reporting};

/// In-process camera rows keyed by camera id.
#[derive(Default)]
pub struct MemoryCameraStore {
    cameras: DashMap<ObjectId, CameraConnection>,
}

impl MemoryCameraStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CameraStore for MemoryCameraStore {
    async fn insert(&self, mut camera: CameraConnection) -> DaoResult<CameraConnection> {
        let id = camera.id.unwrap_or_else(ObjectId::new);
        camera.id = Some(id);
        self.cameras.insert(id, camera.clone());
        Ok(camera)
    }

    async fn find(&self, event_id: ObjectId, camera_id: ObjectId) -> DaoResult<CameraConnection> {
        self.cameras
            .get(&camera_id)
            .filter(|c| c.event_id == event_id)
            .map(|c| c.clone())
            .ok_or(DaoError::NotFound)
    }

    async fn list_by_event(&self, event_id: ObjectId) -> DaoResult<Vec<CameraConnection>> {
        let mut cameras: Vec<CameraConnection> = self
            .cameras
            .iter()
            .filter(|entry| entry.value().event_id == event_id)
            .map(|entry| entry.value().clone())
            .collect();
        cameras.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        Ok(cameras)
    }

    async fn update_status(
        &self,
        event_id: ObjectId,
        camera_id: ObjectId,
        update: &StatusUpdate,
    ) -> DaoResult<CameraConnection> {
        let mut camera = self
            .cameras
            .get_mut(&camera_id)
            .filter(|c| c.event_id == event_id)
            .ok_or(DaoError::NotFound)?;
        apply_update(&mut camera, update);
        Ok(camera.clone())
    }

    async fn mark_stale(&self, cutoff: DateTime, now: DateTime) -> DaoResult<Vec<StaleCamera>> {
        let mut stale = Vec::new();
        for mut entry in self.cameras.iter_mut() {
            let camera_id = *entry.key();
            let camera = entry.value_mut();
            if is_reporting(camera.status) && camera.last_active_at < cutoff {
                camera.status = CameraStatus::Inactive;
                camera.disconnected_at.get_or_insert(now);
                camera.updated_at = now;
                stale.push(StaleCamera {
                    event_id: camera.event_id,
                    camera_id,
                });
            }
        }
        Ok(stale)
    }
}

/// In-process status documents keyed by event id.
#[derive(Default)]
pub struct MemoryStatusStore {
    statuses: DashMap<ObjectId, StreamStatus>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, event_id: ObjectId) -> DaoResult<Option<StreamStatus>> {
        Ok(self.statuses.get(&event_id).map(|s| s.clone()))
    }

    async fn upsert(&self, status: &StreamStatus, expected_revision: i64) -> DaoResult<()> {
        match self.statuses.entry(status.event_id) {
            Entry::Occupied(mut existing) => {
                if existing.get().revision != expected_revision {
                    return Err(DaoError::Conflict(format!(
                        "revision {} != expected {}",
                        existing.get().revision,
                        expected_revision
                    )));
                }
                existing.insert(status.clone());
            }
            Entry::Vacant(slot) => {
                if expected_revision != 0 {
                    return Err(DaoError::Conflict("status document vanished".to_string()));
                }
                slot.insert(status.clone());
            }
        }
        Ok(())
    }

    async fn live_event_ids(&self) -> DaoResult<Vec<ObjectId>> {
        Ok(self
            .statuses
            .iter()
            .filter(|entry| entry.value().is_live)
            .map(|entry| *entry.key())
            .collect())
    }
}
