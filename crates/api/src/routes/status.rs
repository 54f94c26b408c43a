use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use livecast_db::models::{StreamHealth, StreamStatus, SwitchEvent, SwitchReason};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, extractors::auth::CameraAuth, state::AppState};
use super::{parse_id, to_rfc3339};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub event_id: String,
    pub is_live: bool,
    pub active_camera_count: u32,
    pub total_camera_count: u32,
    pub current_active_camera: Option<String>,
    pub active_cameras: Vec<String>,
    pub pinned_camera: Option<String>,
    pub stream_health: StreamHealth,
    pub last_switch_at: Option<String>,
    pub last_updated: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchResponse {
    pub timestamp: String,
    pub from_camera: Option<String>,
    pub to_camera: String,
    pub reason: SwitchReason,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSwitchRequest {
    pub camera_id: String,
}

pub fn to_response(status: &StreamStatus) -> StatusResponse {
    StatusResponse {
        event_id: status.event_id.to_hex(),
        is_live: status.is_live,
        active_camera_count: status.active_camera_count,
        total_camera_count: status.total_camera_count,
        current_active_camera: status.current_active_camera.map(|id| id.to_hex()),
        active_cameras: status.active_cameras.iter().map(|id| id.to_hex()).collect(),
        pinned_camera: status.pinned_camera.map(|id| id.to_hex()),
        stream_health: status.stream_health,
        last_switch_at: status.last_switch_at.map(to_rfc3339),
        last_updated: to_rfc3339(status.updated_at),
    }
}

fn to_switch_response(switch: &SwitchEvent) -> SwitchResponse {
    SwitchResponse {
        timestamp: to_rfc3339(switch.timestamp),
        from_camera: switch.from_camera.map(|id| id.to_hex()),
        to_camera: switch.to_camera.to_hex(),
        reason: switch.reason,
    }
}

/// Viewer-facing snapshot. Never cached by intermediaries.
pub async fn get(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let eid = parse_id(&event_id, "event_id")?;
    let status = state.aggregator.status(eid).await?;

    Ok((
        [
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Json(to_response(&status)),
    ))
}

/// Recorded switches, oldest first.
pub async fn switches(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<SwitchResponse>>, ApiError> {
    let eid = parse_id(&event_id, "event_id")?;
    let status = state.aggregator.status(eid).await?;
    Ok(Json(status.switch_history.iter().map(to_switch_response).collect()))
}

pub async fn manual_switch(
    State(state): State<AppState>,
    auth: CameraAuth,
    Path(event_id): Path<String>,
    Json(body): Json<ManualSwitchRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let eid = parse_id(&event_id, "event_id")?;
    let cid = parse_id(&body.camera_id, "camera_id")?;
    auth.require_event(&event_id)?;
    auth.require_director()?;

    let status = state.aggregator.manual_switch(eid, cid).await?;
    Ok(Json(to_response(&status)))
}
