//! HTTP handlers for share links.
//!
//! Resolving a link needs no caller identity; creating, listing and revoking
//! one do.

use crate::{
    errors::AppError,
    handlers::{caller::CallerId, matter_handlers::content_response},
    models::{
        matter::Matter,
        share::{ResolvedShare, ShareLink, ShareMode},
    },
    services::share_service::ShareService,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateShareReq {
    pub matter_id: Uuid,
    #[serde(default = "default_mode")]
    pub mode: ShareMode,
    /// Absolute expiry. Takes precedence over `ttl_secs`.
    pub expires_at: Option<DateTime<Utc>>,
    pub ttl_secs: Option<i64>,
}

fn default_mode() -> ShareMode {
    ShareMode::ReadOnly
}

#[derive(Debug, Default, Deserialize)]
pub struct WithinQuery {
    /// Defaults to the shared matter itself.
    pub matter_id: Option<Uuid>,
}

/// POST `/shares`
pub async fn create_share(
    State(shares): State<ShareService>,
    CallerId(caller): CallerId,
    Json(req): Json<CreateShareReq>,
) -> Result<impl IntoResponse, AppError> {
    let expires_at = match (req.expires_at, req.ttl_secs) {
        (Some(at), _) => Some(at),
        (None, Some(secs)) => {
            let ttl = Duration::try_seconds(secs)
                .ok_or_else(|| AppError::bad_request("ttl_secs out of range"))?;
            Some(Utc::now() + ttl)
        }
        (None, None) => None,
    };
    let link = shares
        .create(req.matter_id, caller, req.mode, expires_at)
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// GET `/shares/{token}`
pub async fn resolve_share(
    State(shares): State<ShareService>,
    Path(token): Path<String>,
) -> Result<Json<ResolvedShare>, AppError> {
    Ok(Json(shares.resolve_access(&token).await?))
}

/// GET `/shares/{token}/children?matter_id=`
pub async fn list_shared_children(
    State(shares): State<ShareService>,
    Path(token): Path<String>,
    Query(q): Query<WithinQuery>,
) -> Result<Json<Vec<Matter>>, AppError> {
    let folder_id = match q.matter_id {
        Some(id) => id,
        None => shares.resolve(&token).await?,
    };
    Ok(Json(shares.list_within(&token, folder_id).await?))
}

/// GET `/shares/{token}/content?matter_id=`
pub async fn download_shared(
    State(shares): State<ShareService>,
    Path(token): Path<String>,
    Query(q): Query<WithinQuery>,
) -> Result<Response, AppError> {
    let matter_id = match q.matter_id {
        Some(id) => id,
        None => shares.resolve(&token).await?,
    };
    let (matter, record, stream) = shares.download(&token, matter_id).await?;
    Ok(content_response(&matter, &record, stream))
}

/// DELETE `/shares/{token}`
pub async fn revoke_share(
    State(shares): State<ShareService>,
    CallerId(caller): CallerId,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    shares.revoke(&token, caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/matters/{id}/shares`: the caller's live links on a matter.
pub async fn list_matter_shares(
    State(shares): State<ShareService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Json<Vec<ShareLink>>, AppError> {
    Ok(Json(shares.list_for_matter(matter_id, caller).await?))
}
