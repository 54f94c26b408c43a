//! Thin HTTP client for the Livecast API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reporter::{CameraStatus, HttpStatusEndpoint, StreamQualityReport};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: Option<String>,
    pub browser: Option<String>,
    pub user_agent: Option<String>,
}

impl DeviceInfo {
    /// Describes the machine the agent runs on.
    pub fn local() -> Self {
        Self {
            platform: Some(std::env::consts::OS.to_string()),
            browser: None,
            user_agent: Some(format!("livecast-operator/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinBody<'a> {
    display_name: Option<&'a str>,
    device_info: &'a DeviceInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedCamera {
    pub id: String,
    pub event_id: String,
    pub participant_id: String,
    pub status: CameraStatus,
    pub joined_at: String,
    pub stream_quality: Option<StreamQualityReport>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStatus {
    pub is_live: bool,
    pub active_camera_count: u32,
    pub total_camera_count: u32,
    pub current_active_camera: Option<String>,
    pub stream_health: String,
    pub last_switch_at: Option<String>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl ApiClient {
    pub fn new(api_url: &str, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Registers this operator's camera for `event_id`.
    pub async fn join(
        &self,
        event_id: &str,
        display_name: Option<&str>,
        device_info: &DeviceInfo,
    ) -> Result<JoinedCamera, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/events/{event_id}/cameras", self.base))
            .bearer_auth(&self.token)
            .json(&JoinBody {
                display_name,
                device_info,
            })
            .send()
            .await?;
        let camera: JoinedCamera = Self::parse(response).await?;
        tracing::info!(camera_id = %camera.id, event_id, "Joined event");
        Ok(camera)
    }

    pub async fn status(&self, event_id: &str) -> Result<EventStatus, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/events/{event_id}/status", self.base))
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Endpoint the status reporter PUTs to for `camera_id`.
    pub fn status_endpoint(&self, event_id: &str, camera_id: &str) -> HttpStatusEndpoint {
        HttpStatusEndpoint::new(self.http.clone(), &self.base, event_id, camera_id, self.token.clone())
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
