//! HTTP route handlers.

pub mod books;
pub mod health;
pub mod metrics;
pub mod reservations;

use common::CorrelationId;

use crate::error::ApiError;

pub(crate) fn parse_id(field: &str, id: &str) -> Result<CorrelationId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))?;
    Ok(CorrelationId::from_uuid(uuid))
}
