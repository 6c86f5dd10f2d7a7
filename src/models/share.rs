//! Represents a share link granting access to one matter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Access a link grants.
///
/// Advisory: links only ever serve reads here. The mode is stored and handed
/// back by `resolve_access` for a front end that offers writes through links.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareMode {
    ReadOnly,
    ReadWrite,
}

/// A capability over a matter and, for folders, its descendants.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ShareLink {
    /// Unguessable URL-safe token.
    pub token: String,

    pub matter_id: Uuid,

    pub creator_id: Uuid,

    pub mode: ShareMode,

    /// Links without an expiry live as long as their target.
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub is_revoked: bool,
}

impl ShareLink {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// What a resolved token grants.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedShare {
    pub matter_id: Uuid,
    pub mode: ShareMode,
}
