use bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// One operator's contribution to an event. Never deleted while the event
/// is live; loss of the feed is recorded as `inactive` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConnection {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub event_id: ObjectId,
    /// Operator identity as issued by the participation service.
    pub participant_id: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// Populated once the camera is publishing.
    pub stream_quality: Option<StreamQuality>,
    #[serde(default)]
    pub status: CameraStatus,
    pub joined_at: DateTime,
    pub last_active_at: DateTime,
    /// Stamped on the first transition to `inactive`/`error`, never overwritten.
    pub disconnected_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    #[default]
    Connecting,
    Active,
    Inactive,
    Error,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Connecting => "connecting",
            CameraStatus::Active => "active",
            CameraStatus::Inactive => "inactive",
            CameraStatus::Error => "error",
        }
    }

    /// Statuses that mean the feed is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CameraStatus::Inactive | CameraStatus::Error)
    }
}

/// Opaque client description; stored as reported.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeviceInfo {
    pub platform: Option<String>,
    pub browser: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamQuality {
    /// e.g. "1280x720"
    pub resolution: Option<String>,
    pub frame_rate: Option<u32>,
    /// kbps
    pub bitrate: Option<u32>,
    pub codec: Option<String>,
}

impl CameraConnection {
    pub const COLLECTION: &'static str = "camera_connections";

    pub fn is_active(&self) -> bool {
        self.status == CameraStatus::Active
    }
}
