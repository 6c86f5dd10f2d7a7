//! Caller identity.
//!
//! Authentication happens in front of this service; the gateway forwards the
//! authenticated user id in `X-User-Id`.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const CALLER_HEADER: &str = "x-user-id";

/// The user a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| AppError::unauthorized("missing X-User-Id header"))?;
        let value = raw
            .to_str()
            .map_err(|_| AppError::bad_request("X-User-Id is not valid text"))?;
        let id = Uuid::parse_str(value.trim())
            .map_err(|_| AppError::bad_request("X-User-Id must be a UUID"))?;
        Ok(CallerId(id))
    }
}
