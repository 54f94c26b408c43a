use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use livecast_services::{CameraClaims, CameraRole};

use crate::{error::ApiError, state::AppState};

/// Caller identified by a camera token in the `Authorization` header.
#[derive(Debug, Clone)]
pub struct CameraAuth {
    pub participant_id: String,
    pub claims: CameraClaims,
}

impl CameraAuth {
    /// Rejects tokens issued for another event.
    pub fn require_event(&self, event_id: &str) -> Result<(), ApiError> {
        if self.claims.is_for_event(event_id) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Token is not valid for this event".to_string()))
        }
    }

    pub fn require_director(&self) -> Result<(), ApiError> {
        match self.claims.role {
            CameraRole::Director => Ok(()),
            CameraRole::Operator => {
                Err(ApiError::Forbidden("Director role required".to_string()))
            }
        }
    }
}

impl<S> FromRequestParts<S> for CameraAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("No token provided".to_string()))?;

        let claims = app_state.verifier.verify(token)?;

        Ok(CameraAuth {
            participant_id: claims.sub.clone(),
            claims,
        })
    }
}
