pub mod camera;
pub mod status;
pub mod stream;

use bson::oid::ObjectId;

use crate::error::ApiError;

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid {what}")))
}

pub(crate) fn to_rfc3339(at: bson::DateTime) -> String {
    at.to_chrono().to_rfc3339()
}
