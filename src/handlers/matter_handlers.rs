//! HTTP handlers for the matter hierarchy.
//! File bodies are streamed in both directions; nothing is buffered whole.

use crate::{
    errors::AppError,
    handlers::caller::CallerId,
    models::{content::ContentRecord, matter::Matter},
    services::{
        backend::ByteStream,
        matter_service::{DeleteReport, MatterService},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveReq {
    pub new_parent_id: Uuid,
    /// Keeps the current name when absent.
    pub new_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PrivacyReq {
    pub is_private: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListChildrenQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct SizeResp {
    pub matter_id: Uuid,
    pub size_bytes: i64,
}

#[derive(Debug, Serialize)]
pub struct PathResp {
    pub matter_id: Uuid,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResp {
    pub removed: usize,
}

fn body_stream(body: Body) -> impl futures::Stream<Item = io::Result<bytes::Bytes>> + Send {
    body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other))
}

/// GET/POST `/matters/root`: the caller's root folder, created on first use.
pub async fn ensure_root(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
) -> Result<Json<Matter>, AppError> {
    Ok(Json(service.ensure_root(caller).await?))
}

/// POST `/matters/{id}/folders`
pub async fn create_folder(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(parent_id): Path<Uuid>,
    Json(req): Json<CreateFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    let folder = service.create_folder(parent_id, &req.name, caller).await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// PUT `/matters/{id}/files/{name}`: upload a new file into a folder.
pub async fn upload_file(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path((parent_id, name)): Path<(Uuid, String)>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let file = service
        .upload(parent_id, &name, caller, body_stream(body))
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// PUT `/matters/{id}/content`: replace a file's bytes.
pub async fn replace_content(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
    body: Body,
) -> Result<Json<Matter>, AppError> {
    let file = service
        .replace_content(matter_id, caller, body_stream(body))
        .await?;
    Ok(Json(file))
}

/// GET `/matters/{id}/content`: stream a file.
pub async fn download(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (matter, record, stream) = service.download(matter_id, caller).await?;
    Ok(content_response(&matter, &record, stream))
}

/// GET `/matters/{id}`
pub async fn get_matter(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Json<Matter>, AppError> {
    Ok(Json(service.get(matter_id, caller).await?))
}

/// PATCH `/matters/{id}`: toggle privacy.
pub async fn set_privacy(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
    Json(req): Json<PrivacyReq>,
) -> Result<Json<Matter>, AppError> {
    let matter = service
        .catalog()
        .set_privacy(matter_id, caller, req.is_private)
        .await?;
    Ok(Json(matter))
}

/// GET `/matters/{id}/children?include_deleted=`
pub async fn list_children(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(parent_id): Path<Uuid>,
    Query(q): Query<ListChildrenQuery>,
) -> Result<Json<Vec<Matter>>, AppError> {
    let children = service
        .list_children(parent_id, caller, q.include_deleted)
        .await?;
    Ok(Json(children))
}

/// POST `/matters/{id}/move`
pub async fn move_matter(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
    Json(req): Json<MoveReq>,
) -> Result<Json<Matter>, AppError> {
    let name = match req.new_name {
        Some(name) => name,
        None => service.get(matter_id, caller).await?.name,
    };
    let moved = service
        .move_to(matter_id, req.new_parent_id, &name, caller)
        .await?;
    Ok(Json(moved))
}

/// POST `/matters/{id}/rename`
pub async fn rename_matter(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
    Json(req): Json<RenameReq>,
) -> Result<Json<Matter>, AppError> {
    Ok(Json(service.rename(matter_id, &req.name, caller).await?))
}

/// DELETE `/matters/{id}`: soft-delete the matter and its subtree.
pub async fn delete_matter(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Json<DeleteReport>, AppError> {
    Ok(Json(service.delete_recursive(matter_id, caller).await?))
}

/// POST `/matters/{id}/restore`
pub async fn restore_matter(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Json<Matter>, AppError> {
    Ok(Json(service.restore(matter_id, caller).await?))
}

/// POST `/matters/{id}/purge`: permanently drop a deleted subtree.
pub async fn purge_matter(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Json<PurgeResp>, AppError> {
    let removed = service.purge(matter_id, caller).await?;
    Ok(Json(PurgeResp { removed }))
}

/// GET `/matters/{id}/size`
pub async fn folder_size(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Json<SizeResp>, AppError> {
    let size_bytes = service.catalog().folder_size(matter_id, caller).await?;
    Ok(Json(SizeResp {
        matter_id,
        size_bytes,
    }))
}

/// GET `/matters/{id}/path`
pub async fn matter_path(
    State(service): State<MatterService>,
    CallerId(caller): CallerId,
    Path(matter_id): Path<Uuid>,
) -> Result<Json<PathResp>, AppError> {
    let path = service.catalog().path(matter_id, caller).await?;
    Ok(Json(PathResp { matter_id, path }))
}

/// Streaming response for a file's bytes.
pub(crate) fn content_response(matter: &Matter, record: &ContentRecord, stream: ByteStream) -> Response {
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_content_headers(response.headers_mut(), matter, record);
    response
}

fn set_content_headers(headers: &mut HeaderMap, matter: &Matter, record: &ContentRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let quoted = format!("\"{}\"", record.md5);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    // Names with characters a header cannot carry fall back to no filename.
    let disposition = format!("attachment; filename=\"{}\"", matter.name.replace('"', "'"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&matter.updated_at.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
}
