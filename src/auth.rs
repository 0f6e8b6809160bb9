use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Header carrying the verified caller identity, installed by the upstream
/// auth layer. This service never authenticates on its own; it only consumes
/// the capability.
pub const OWNER_ID_HEADER: &str = "x-owner-id";

/// Verified caller identity for the current request.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedOwner(pub Uuid);

impl<S> FromRequestParts<S> for AuthenticatedOwner
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing caller identity".to_string()))?;

        let owner_id = Uuid::parse_str(value)
            .map_err(|_| ServiceError::Unauthorized("malformed caller identity".to_string()))?;

        Ok(AuthenticatedOwner(owner_id))
    }
}
