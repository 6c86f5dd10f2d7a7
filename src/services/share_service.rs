//! Share links: unguessable tokens granting access to a matter and, for
//! folders, everything below it.
//!
//! Resolution failures never say more than "share link not found": a revoked,
//! an unknown and a target-deleted link all look the same to the caller, and
//! an expired one carries the same message.

use crate::{
    models::{
        content::ContentRecord,
        matter::Matter,
        share::{ResolvedShare, ShareLink, ShareMode},
    },
    services::{
        backend::ByteStream,
        catalog::MatterCatalog,
        error::{DriveError, DriveResult},
        matter_service::MatterService,
    },
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::SqliteConnection;
use uuid::Uuid;

const SHARE_COLUMNS: &str = "token, matter_id, creator_id, mode, expires_at, created_at, is_revoked";

const TOKEN_BYTES: usize = 32;

#[derive(Clone)]
pub struct ShareService {
    matters: MatterService,
}

fn unresolvable() -> DriveError {
    DriveError::not_found("share link")
}

fn new_token() -> String {
    let mut raw = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

impl ShareService {
    pub fn new(matters: MatterService) -> Self {
        Self { matters }
    }

    /// Issue a link for a live matter owned by `creator_id`.
    pub async fn create(
        &self,
        matter_id: Uuid,
        creator_id: Uuid,
        mode: ShareMode,
        expires_at: Option<DateTime<Utc>>,
    ) -> DriveResult<ShareLink> {
        let now = Utc::now();
        if let Some(at) = expires_at.filter(|at| *at <= now) {
            return Err(DriveError::InvalidExpiry(at));
        }

        let mut tx = self.matters.db().begin().await?;
        let target = MatterCatalog::fetch_in(&mut tx, matter_id).await?;
        match target {
            Some(m) if !m.is_deleted && m.owner_id == creator_id => {}
            _ => return Err(DriveError::not_found(format!("matter {}", matter_id))),
        }

        let link = sqlx::query_as::<_, ShareLink>(&format!(
            "INSERT INTO share_links (token, matter_id, creator_id, mode, expires_at, created_at, is_revoked)
             VALUES (?, ?, ?, ?, ?, ?, 0) RETURNING {}",
            SHARE_COLUMNS
        ))
        .bind(new_token())
        .bind(matter_id)
        .bind(creator_id)
        .bind(mode)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(matter = %matter_id, mode = ?mode, "created share link");
        Ok(link)
    }

    async fn fetch_in(conn: &mut SqliteConnection, token: &str) -> DriveResult<Option<ShareLink>> {
        let link = sqlx::query_as::<_, ShareLink>(&format!(
            "SELECT {} FROM share_links WHERE token = ?",
            SHARE_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(link)
    }

    /// Check a token and return the live target with the link.
    async fn resolve_target_in(
        conn: &mut SqliteConnection,
        token: &str,
    ) -> DriveResult<(ShareLink, Matter)> {
        let link = match Self::fetch_in(conn, token).await? {
            Some(link) if !link.is_revoked => link,
            _ => return Err(unresolvable()),
        };
        if link.is_expired_at(Utc::now()) {
            return Err(DriveError::Expired);
        }
        match MatterCatalog::fetch_in(conn, link.matter_id).await? {
            Some(target) if !target.is_deleted => Ok((link, target)),
            _ => Err(unresolvable()),
        }
    }

    /// Target matter id of a live link.
    pub async fn resolve(&self, token: &str) -> DriveResult<Uuid> {
        Ok(self.resolve_access(token).await?.matter_id)
    }

    /// Target and access mode of a live link.
    pub async fn resolve_access(&self, token: &str) -> DriveResult<ResolvedShare> {
        let mut conn = self.matters.db().acquire().await?;
        let (link, _) = Self::resolve_target_in(&mut conn, token).await?;
        Ok(ResolvedShare {
            matter_id: link.matter_id,
            mode: link.mode,
        })
    }

    /// Fetch `matter_id` through a link: it must be the shared matter or a
    /// live descendant of a shared folder.
    pub async fn resolve_within(&self, token: &str, matter_id: Uuid) -> DriveResult<Matter> {
        let mut conn = self.matters.db().acquire().await?;
        let (link, target) = Self::resolve_target_in(&mut conn, token).await?;
        if matter_id == target.id {
            return Ok(target);
        }
        if !target.is_folder() {
            return Err(unresolvable());
        }

        let matter = match MatterCatalog::fetch_in(&mut conn, matter_id).await? {
            Some(m) if !m.is_deleted => m,
            _ => return Err(unresolvable()),
        };
        if !MatterCatalog::is_ancestor_or_self_in(&mut conn, link.matter_id, matter_id).await? {
            return Err(unresolvable());
        }
        Ok(matter)
    }

    /// Live children of a shared folder (or of a folder inside it).
    pub async fn list_within(&self, token: &str, folder_id: Uuid) -> DriveResult<Vec<Matter>> {
        let folder = self.resolve_within(token, folder_id).await?;
        if !folder.is_folder() {
            return Err(unresolvable());
        }
        let mut conn = self.matters.db().acquire().await?;
        let mut children = MatterCatalog::live_children_in(&mut conn, folder.id).await?;
        crate::services::catalog::sort_for_listing(&mut children);
        Ok(children)
    }

    /// Download a file reachable through a link.
    pub async fn download(
        &self,
        token: &str,
        matter_id: Uuid,
    ) -> DriveResult<(Matter, ContentRecord, ByteStream)> {
        let matter = self.resolve_within(token, matter_id).await?;
        self.matters.open_content(matter).await
    }

    /// Revoke a link. Only its creator may do so; anyone else sees `NotFound`.
    pub async fn revoke(&self, token: &str, creator_id: Uuid) -> DriveResult<()> {
        let result = sqlx::query(
            "UPDATE share_links SET is_revoked = 1 WHERE token = ? AND creator_id = ? AND is_revoked = 0",
        )
        .bind(token)
        .bind(creator_id)
        .execute(self.matters.db())
        .await?;
        if result.rows_affected() == 0 {
            return Err(unresolvable());
        }
        tracing::info!("revoked share link");
        Ok(())
    }

    /// Links a creator issued for one matter, newest first.
    pub async fn list_for_matter(&self, matter_id: Uuid, creator_id: Uuid) -> DriveResult<Vec<ShareLink>> {
        let rows = sqlx::query_as::<_, ShareLink>(&format!(
            "SELECT {} FROM share_links WHERE matter_id = ? AND creator_id = ? AND is_revoked = 0
             ORDER BY created_at DESC",
            SHARE_COLUMNS
        ))
        .bind(matter_id)
        .bind(creator_id)
        .fetch_all(self.matters.db())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_url_safe() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn expired_and_unknown_links_read_the_same() {
        assert_eq!(DriveError::Expired.to_string(), unresolvable().to_string());
    }
}
