//! Defines routes for the matter hierarchy and share links.
//!
//! ## Structure
//! - **Matter endpoints** (caller identified by `X-User-Id`)
//!   - `GET|POST /matters/root`: the caller's root folder
//!   - `GET|PATCH|DELETE /matters/{id}`: fetch, toggle privacy, soft-delete subtree
//!   - `GET  /matters/{id}/children`: list (`?include_deleted=true` for owners)
//!   - `POST /matters/{id}/folders`: create a folder
//!   - `PUT  /matters/{id}/files/{name}`: upload a file
//!   - `GET|PUT /matters/{id}/content`: download or replace bytes
//!   - `POST /matters/{id}/move`, `/rename`, `/restore`, `/purge`
//!   - `GET  /matters/{id}/size`, `/path`, `/shares`
//!
//! - **Share endpoints**
//!   - `POST   /shares`: create a link
//!   - `GET    /shares/{token}`: resolve
//!   - `GET    /shares/{token}/children`, `/content`: browse and download
//!   - `DELETE /shares/{token}`: revoke

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        matter_handlers::{
            create_folder, delete_matter, download, ensure_root, folder_size, get_matter,
            list_children, matter_path, move_matter, purge_matter, rename_matter, replace_content,
            restore_matter, set_privacy, upload_file,
        },
        share_handlers::{
            create_share, download_shared, list_matter_shares, list_shared_children,
            resolve_share, revoke_share,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router for every endpoint.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Matter routes
        .route("/matters/root", get(ensure_root).post(ensure_root))
        .route(
            "/matters/{id}",
            get(get_matter).patch(set_privacy).delete(delete_matter),
        )
        .route("/matters/{id}/children", get(list_children))
        .route("/matters/{id}/folders", post(create_folder))
        .route("/matters/{id}/files/{name}", put(upload_file))
        .route("/matters/{id}/content", get(download).put(replace_content))
        .route("/matters/{id}/move", post(move_matter))
        .route("/matters/{id}/rename", post(rename_matter))
        .route("/matters/{id}/restore", post(restore_matter))
        .route("/matters/{id}/purge", post(purge_matter))
        .route("/matters/{id}/size", get(folder_size))
        .route("/matters/{id}/path", get(matter_path))
        .route("/matters/{id}/shares", get(list_matter_shares))
        // Share routes
        .route("/shares", post(create_share))
        .route("/shares/{token}", get(resolve_share).delete(revoke_share))
        .route("/shares/{token}/children", get(list_shared_children))
        .route("/shares/{token}/content", get(download_shared))
}
