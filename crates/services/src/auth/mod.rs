use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use livecast_config::AuthSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Claims of a camera token issued by the participation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraClaims {
    pub sub: String,        // participant_id
    pub event_id: String,
    #[serde(default)]
    pub role: CameraRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraRole {
    #[default]
    Operator,
    Director,
}

impl CameraClaims {
    pub fn is_for_event(&self, event_id: &str) -> bool {
        self.event_id == event_id
    }
}

/// Verifies camera tokens. Minting happens upstream with the same secret.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&settings.issuer]);
        Self {
            decoding_key: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<CameraClaims, TokenError> {
        let token_data = decode::<CameraClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })?;

        Ok(token_data.claims)
    }
}
