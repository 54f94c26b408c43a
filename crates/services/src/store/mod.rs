//! Storage seams for camera rows and per-event status documents.
//!
//! MongoDB-backed implementations live in [`crate::dao`]; [`memory`] keeps
//! everything in process for tests and single-node runs.

pub mod memory;

use async_trait::async_trait;
use bson::{DateTime, oid::ObjectId};
use livecast_db::models::{CameraConnection, CameraStatus, StreamQuality, StreamStatus};

use crate::dao::DaoResult;

pub use memory::{MemoryCameraStore, MemoryStatusStore};

/// One reported camera transition.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: CameraStatus,
    /// Kept from the previous report when absent.
    pub stream_quality: Option<StreamQuality>,
    pub at: DateTime,
}

/// A camera that went quiet and was flipped to `inactive` by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleCamera {
    pub event_id: ObjectId,
    pub camera_id: ObjectId,
}

#[async_trait]
pub trait CameraStore: Send + Sync + 'static {
    async fn insert(&self, camera: CameraConnection) -> DaoResult<CameraConnection>;

    async fn find(&self, event_id: ObjectId, camera_id: ObjectId) -> DaoResult<CameraConnection>;

    /// All cameras of an event, newest join first.
    async fn list_by_event(&self, event_id: ObjectId) -> DaoResult<Vec<CameraConnection>>;

    /// Applies a report. Repeating the same report only bumps timestamps;
    /// `disconnected_at` is set on the first terminal status and kept after.
    async fn update_status(
        &self,
        event_id: ObjectId,
        camera_id: ObjectId,
        update: &StatusUpdate,
    ) -> DaoResult<CameraConnection>;

    /// Flips `connecting`/`active` cameras last seen before `cutoff` to `inactive`.
    async fn mark_stale(&self, cutoff: DateTime, now: DateTime) -> DaoResult<Vec<StaleCamera>>;
}

#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    async fn get(&self, event_id: ObjectId) -> DaoResult<Option<StreamStatus>>;

    /// Writes `status` only if the stored revision still equals
    /// `expected_revision` (0 = no document yet). Otherwise `DaoError::Conflict`.
    async fn upsert(&self, status: &StreamStatus, expected_revision: i64) -> DaoResult<()>;

    async fn live_event_ids(&self) -> DaoResult<Vec<ObjectId>>;
}

pub(crate) fn apply_update(camera: &mut CameraConnection, update: &StatusUpdate) {
    camera.status = update.status;
    if let Some(quality) = &update.stream_quality {
        camera.stream_quality = Some(quality.clone());
    }
    if update.status.is_terminal() && camera.disconnected_at.is_none() {
        camera.disconnected_at = Some(update.at);
    }
    camera.last_active_at = update.at;
    camera.updated_at = update.at;
}

pub(crate) fn is_reporting(status: CameraStatus) -> bool {
    matches!(status, CameraStatus::Connecting | CameraStatus::Active)
}
