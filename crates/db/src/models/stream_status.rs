use bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// Event-wide live status. Written only by the aggregator; one document per
/// event, upserted on every recompute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub event_id: ObjectId,
    pub is_live: bool,
    pub active_camera_count: u32,
    pub total_camera_count: u32,
    /// Weak reference into `camera_connections`.
    pub current_active_camera: Option<ObjectId>,
    /// Sorted ids of the cameras counted in `active_camera_count`.
    #[serde(default)]
    pub active_cameras: Vec<ObjectId>,
    /// Director override; honoured while the camera stays active.
    pub pinned_camera: Option<ObjectId>,
    #[serde(default)]
    pub stream_health: StreamHealth,
    pub last_switch_at: Option<DateTime>,
    #[serde(default)]
    pub switch_history: Vec<SwitchEvent>,
    /// Bumped on every write; upserts are conditional on the previous value.
    #[serde(default)]
    pub revision: i64,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamHealth {
    Excellent,
    Good,
    Poor,
    Critical,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchEvent {
    pub timestamp: DateTime,
    pub from_camera: Option<ObjectId>,
    pub to_camera: ObjectId,
    pub reason: SwitchReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    NewConnection,
    QualityImprovement,
    ManualSwitch,
    Disconnection,
}

impl StreamStatus {
    pub const COLLECTION: &'static str = "stream_status";

    /// Status of an event nobody has joined yet.
    pub fn empty(event_id: ObjectId) -> Self {
        Self {
            id: None,
            event_id,
            is_live: false,
            active_camera_count: 0,
            total_camera_count: 0,
            current_active_camera: None,
            active_cameras: Vec::new(),
            pinned_camera: None,
            stream_health: StreamHealth::Unknown,
            last_switch_at: None,
            switch_history: Vec::new(),
            revision: 0,
            updated_at: DateTime::now(),
        }
    }
}
