//! Represents a matter (file or folder) in an owner's tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether a matter holds content or other matters.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum MatterKind {
    Folder,
    File,
}

/// A single node of the hierarchy.
///
/// The `Matter` struct stores metadata only. File bytes live in the storage
/// backend and are reached through `content_hash`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Matter {
    /// Stable identifier.
    pub id: Uuid,

    /// User owning this matter and every ancestor of it.
    pub owner_id: Uuid,

    /// Parent folder. `None` only for an owner's root.
    pub parent_id: Option<Uuid>,

    /// Name, unique among live siblings (case-sensitive).
    pub name: String,

    pub kind: MatterKind,

    /// Size in bytes. Always 0 for folders; see `MatterCatalog::folder_size`.
    pub size_bytes: i64,

    /// SHA-256 of the content for files, `None` for folders.
    pub content_hash: Option<String>,

    /// Private matters are visible to their owner only.
    pub is_private: bool,

    /// Number of completed downloads.
    pub download_count: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker.
    pub is_deleted: bool,

    pub deleted_at: Option<DateTime<Utc>>,
}

impl Matter {
    pub fn is_folder(&self) -> bool {
        self.kind == MatterKind::Folder
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether `caller` may read this matter.
    pub fn visible_to(&self, caller: Uuid) -> bool {
        self.owner_id == caller || !self.is_private
    }
}
