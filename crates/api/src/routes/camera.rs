use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use bson::{DateTime, oid::ObjectId};
use livecast_db::models::{CameraConnection, CameraStatus, DeviceInfo, StreamQuality};
use livecast_services::StatusUpdate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{error::ApiError, extractors::auth::CameraAuth, state::AppState};
use super::{parse_id, to_rfc3339};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraResponse {
    pub id: String,
    pub event_id: String,
    pub participant_id: String,
    pub display_name: Option<String>,
    pub device_info: DeviceInfoBody,
    pub stream_quality: Option<QualityBody>,
    pub status: CameraStatus,
    pub joined_at: String,
    pub last_active_at: String,
    pub disconnected_at: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfoBody {
    #[validate(length(max = 64))]
    pub platform: Option<String>,
    #[validate(length(max = 64))]
    pub browser: Option<String>,
    #[validate(length(max = 512))]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QualityBody {
    #[validate(length(max = 32))]
    pub resolution: Option<String>,
    #[validate(range(max = 240))]
    pub frame_rate: Option<u32>,
    pub bitrate: Option<u32>,
    #[validate(length(max = 32))]
    pub codec: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[validate(length(min = 1, max = 100))]
    pub display_name: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub device_info: DeviceInfoBody,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: CameraStatus,
    #[validate(nested)]
    pub stream_quality: Option<QualityBody>,
}

impl From<QualityBody> for StreamQuality {
    fn from(body: QualityBody) -> Self {
        StreamQuality {
            resolution: body.resolution,
            frame_rate: body.frame_rate,
            bitrate: body.bitrate,
            codec: body.codec,
        }
    }
}

pub fn to_response(camera: CameraConnection) -> CameraResponse {
    CameraResponse {
        id: camera.id.map(|id| id.to_hex()).unwrap_or_default(),
        event_id: camera.event_id.to_hex(),
        participant_id: camera.participant_id,
        display_name: camera.display_name,
        device_info: DeviceInfoBody {
            platform: camera.device_info.platform,
            browser: camera.device_info.browser,
            user_agent: camera.device_info.user_agent,
        },
        stream_quality: camera.stream_quality.map(|q| QualityBody {
            resolution: q.resolution,
            frame_rate: q.frame_rate,
            bitrate: q.bitrate,
            codec: q.codec,
        }),
        status: camera.status,
        joined_at: to_rfc3339(camera.joined_at),
        last_active_at: to_rfc3339(camera.last_active_at),
        disconnected_at: camera.disconnected_at.map(to_rfc3339),
    }
}

/// Recomputes after a camera change. The camera write already succeeded,
/// so a failed recompute is left to the sweeper.
async fn refresh_status(state: &AppState, event_id: ObjectId) {
    if let Err(e) = state.aggregator.recompute(event_id).await {
        tracing::warn!(%event_id, error = %e, "Status recompute deferred to sweeper");
    }
}

pub async fn join(
    State(state): State<AppState>,
    auth: CameraAuth,
    Path(event_id): Path<String>,
    Json(body): Json<JoinRequest>,
) -> Result<(StatusCode, Json<CameraResponse>), ApiError> {
    let eid = parse_id(&event_id, "event_id")?;
    auth.require_event(&event_id)?;
    body.validate()?;

    let now = DateTime::now();
    let camera = CameraConnection {
        id: None,
        event_id: eid,
        participant_id: auth.participant_id.clone(),
        display_name: body.display_name,
        device_info: DeviceInfo {
            platform: body.device_info.platform,
            browser: body.device_info.browser,
            user_agent: body.device_info.user_agent,
        },
        stream_quality: None,
        status: CameraStatus::Connecting,
        joined_at: now,
        last_active_at: now,
        disconnected_at: None,
        created_at: now,
        updated_at: now,
    };
    let camera = state.cameras.insert(camera).await?;
    tracing::info!(
        event_id = %eid,
        camera_id = ?camera.id,
        participant_id = %camera.participant_id,
        "Camera joined"
    );

    refresh_status(&state, eid).await;
    Ok((StatusCode::CREATED, Json(to_response(camera))))
}

pub async fn list(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<CameraResponse>>, ApiError> {
    let eid = parse_id(&event_id, "event_id")?;
    let cameras = state.cameras.list_by_event(eid).await?;
    Ok(Json(cameras.into_iter().map(to_response).collect()))
}

pub async fn report_status(
    State(state): State<AppState>,
    auth: CameraAuth,
    Path((event_id, camera_id)): Path<(String, String)>,
    Json(body): Json<StatusReport>,
) -> Result<Json<CameraResponse>, ApiError> {
    let eid = parse_id(&event_id, "event_id")?;
    let cid = parse_id(&camera_id, "camera_id")?;
    auth.require_event(&event_id)?;
    body.validate()?;

    let existing = state.cameras.find(eid, cid).await?;
    if existing.participant_id != auth.participant_id {
        return Err(ApiError::Forbidden("Camera belongs to another participant".to_string()));
    }

    let update = StatusUpdate {
        status: body.status,
        stream_quality: body.stream_quality.map(Into::into),
        at: DateTime::now(),
    };
    let camera = state.cameras.update_status(eid, cid, &update).await?;
    if existing.status != camera.status {
        tracing::info!(
            event_id = %eid,
            camera_id = %cid,
            from = existing.status.as_str(),
            to = camera.status.as_str(),
            "Camera status changed"
        );
    }

    refresh_status(&state, eid).await;
    Ok(Json(to_response(camera)))
}
