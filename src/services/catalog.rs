//! src/services/catalog.rs
//!
//! MatterCatalog: the authoritative folder/file tree kept in SQLite.
//!
//! Every public mutation runs in its own transaction. The `*_in` associated
//! functions take a bare connection so the orchestrator can combine a catalog
//! change with dedup bookkeeping inside one transaction.

use crate::{
    models::matter::{Matter, MatterKind},
    services::error::{DriveError, DriveResult, is_unique_violation},
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::{collections::HashSet, sync::Arc};
use uuid::Uuid;

const MATTER_COLUMNS: &str = "id, owner_id, parent_id, name, kind, size_bytes, content_hash, \
     is_private, download_count, created_at, updated_at, is_deleted, deleted_at";

const MAX_NAME_LEN: usize = 255;

/// Upper bound on ancestor walks; a longer chain means the tree is corrupt.
const MAX_DEPTH: usize = 4096;

#[derive(Clone)]
pub struct MatterCatalog {
    db: Arc<SqlitePool>,
}

/// Fields of a matter about to be inserted.
struct NewMatter<'a> {
    owner_id: Uuid,
    parent_id: Uuid,
    name: &'a str,
    kind: MatterKind,
    size_bytes: i64,
    content_hash: Option<&'a str>,
}

impl MatterCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Validate a matter name.
    ///
    /// - non-empty, at most 255 bytes
    /// - no leading or trailing whitespace
    /// - not `.` or `..`
    /// - no `/`, `\` or control characters
    pub fn ensure_name_valid(name: &str) -> DriveResult<()> {
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.trim() != name {
            Some("cannot begin or end with whitespace")
        } else if name.len() > MAX_NAME_LEN {
            Some("must be at most 255 bytes")
        } else if name == "." || name == ".." {
            Some("`.` and `..` are reserved")
        } else if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            Some("cannot contain slashes or control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DriveError::InvalidName {
                name: name.to_string(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }

    /// Fetch a matter row regardless of its deletion flag.
    pub(crate) async fn fetch_in(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> DriveResult<Option<Matter>> {
        let matter = sqlx::query_as::<_, Matter>(&format!(
            "SELECT {} FROM matters WHERE id = ?",
            MATTER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(matter)
    }

    /// Fetch a live matter visible to `caller`.
    pub(crate) async fn fetch_visible_in(
        conn: &mut SqliteConnection,
        id: Uuid,
        caller: Uuid,
    ) -> DriveResult<Matter> {
        match Self::fetch_in(conn, id).await? {
            Some(m) if !m.is_deleted && m.visible_to(caller) => Ok(m),
            _ => Err(DriveError::not_found(format!("matter {}", id))),
        }
    }

    /// Fetch a live matter that `owner` may mutate.
    ///
    /// Invisible matters are `NotFound`; visible matters of another owner are
    /// `CrossOwnerForbidden`.
    pub(crate) async fn fetch_owned_in(
        conn: &mut SqliteConnection,
        id: Uuid,
        owner: Uuid,
    ) -> DriveResult<Matter> {
        let matter = Self::fetch_visible_in(conn, id, owner).await?;
        if matter.owner_id != owner {
            return Err(DriveError::CrossOwnerForbidden(id));
        }
        Ok(matter)
    }

    /// Fetch a live folder owned by `owner`; anything else is `NotFound`.
    async fn fetch_parent_folder_in(
        conn: &mut SqliteConnection,
        parent_id: Uuid,
        owner: Uuid,
    ) -> DriveResult<Matter> {
        match Self::fetch_in(conn, parent_id).await? {
            Some(p) if !p.is_deleted && p.is_folder() && p.owner_id == owner => Ok(p),
            _ => Err(DriveError::not_found(format!("folder {}", parent_id))),
        }
    }

    async fn ensure_no_live_sibling_in(
        conn: &mut SqliteConnection,
        parent_id: Uuid,
        name: &str,
        exclude: Option<Uuid>,
    ) -> DriveResult<()> {
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM matters WHERE parent_id = ? AND name = ? AND is_deleted = 0",
        )
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

        match existing {
            Some(id) if Some(id) != exclude => Err(DriveError::NameConflict {
                parent_id,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn insert_in(conn: &mut SqliteConnection, new: NewMatter<'_>) -> DriveResult<Matter> {
        Self::ensure_name_valid(new.name)?;
        Self::fetch_parent_folder_in(conn, new.parent_id, new.owner_id).await?;
        Self::ensure_no_live_sibling_in(conn, new.parent_id, new.name, None).await?;

        let now = Utc::now();
        sqlx::query_as::<_, Matter>(&format!(
            "INSERT INTO matters (
                id, owner_id, parent_id, name, kind, size_bytes, content_hash,
                is_private, download_count, created_at, updated_at, is_deleted, deleted_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?, 0, NULL)
             RETURNING {}",
            MATTER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.owner_id)
        .bind(new.parent_id)
        .bind(new.name)
        .bind(new.kind)
        .bind(new.size_bytes)
        .bind(new.content_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DriveError::NameConflict {
                    parent_id: new.parent_id,
                    name: new.name.to_string(),
                }
            } else {
                DriveError::Sqlx(err)
            }
        })
    }

    /// Return the owner's root folder, creating it on first use.
    pub async fn ensure_root(&self, owner: Uuid) -> DriveResult<Matter> {
        let mut tx = self.db.begin().await?;
        let existing = sqlx::query_as::<_, Matter>(&format!(
            "SELECT {} FROM matters WHERE owner_id = ? AND parent_id IS NULL",
            MATTER_COLUMNS
        ))
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(root) = existing {
            return Ok(root);
        }

        let now = Utc::now();
        let root = sqlx::query_as::<_, Matter>(&format!(
            "INSERT INTO matters (
                id, owner_id, parent_id, name, kind, size_bytes, content_hash,
                is_private, download_count, created_at, updated_at, is_deleted, deleted_at
             ) VALUES (?, ?, NULL, '', 'FOLDER', 0, NULL, 1, 0, ?, ?, 0, NULL)
             RETURNING {}",
            MATTER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(owner = %owner, root = %root.id, "created root folder");
        Ok(root)
    }

    /// Create a folder under `parent_id`.
    pub async fn create_folder(
        &self,
        parent_id: Uuid,
        name: &str,
        owner: Uuid,
    ) -> DriveResult<Matter> {
        let mut tx = self.db.begin().await?;
        let folder = Self::insert_in(
            &mut tx,
            NewMatter {
                owner_id: owner,
                parent_id,
                name,
                kind: MatterKind::Folder,
                size_bytes: 0,
                content_hash: None,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(folder)
    }

    /// Insert a file entry pointing at an already registered content hash.
    pub(crate) async fn create_file_entry_in(
        conn: &mut SqliteConnection,
        parent_id: Uuid,
        name: &str,
        owner: Uuid,
        hash: &str,
        size_bytes: i64,
    ) -> DriveResult<Matter> {
        Self::insert_in(
            conn,
            NewMatter {
                owner_id: owner,
                parent_id,
                name,
                kind: MatterKind::File,
                size_bytes,
                content_hash: Some(hash),
            },
        )
        .await
    }

    /// Check a prospective file placement without writing anything.
    pub(crate) async fn ensure_placement_available(
        &self,
        parent_id: Uuid,
        name: &str,
        owner: Uuid,
    ) -> DriveResult<()> {
        Self::ensure_name_valid(name)?;
        let mut conn = self.db.acquire().await?;
        Self::fetch_parent_folder_in(&mut conn, parent_id, owner).await?;
        Self::ensure_no_live_sibling_in(&mut conn, parent_id, name, None).await
    }

    /// Walk from `start` to its root, returning every id on the way
    /// (`start` included).
    async fn ancestor_chain_in(
        conn: &mut SqliteConnection,
        start: Uuid,
    ) -> DriveResult<Vec<Uuid>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) || chain.len() >= MAX_DEPTH {
                return Err(DriveError::invariant(format!(
                    "ancestor chain of {} does not terminate",
                    start
                )));
            }
            chain.push(id);
            let parent: Option<Option<Uuid>> =
                sqlx::query_scalar("SELECT parent_id FROM matters WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
            current = match parent {
                Some(parent) => parent,
                None => {
                    return Err(DriveError::invariant(format!(
                        "ancestor chain of {} reaches missing matter {}",
                        start, id
                    )));
                }
            };
        }
        Ok(chain)
    }

    /// Whether `ancestor` is `id` or lies on its parent chain.
    pub(crate) async fn is_ancestor_or_self_in(
        conn: &mut SqliteConnection,
        ancestor: Uuid,
        id: Uuid,
    ) -> DriveResult<bool> {
        Ok(Self::ancestor_chain_in(conn, id).await?.contains(&ancestor))
    }

    /// Atomically re-parent and rename a matter.
    pub async fn move_to(
        &self,
        matter_id: Uuid,
        new_parent_id: Uuid,
        new_name: &str,
        owner: Uuid,
    ) -> DriveResult<Matter> {
        let mut tx = self.db.begin().await?;
        let matter = Self::fetch_owned_in(&mut tx, matter_id, owner).await?;
        if matter.is_root() {
            return Err(DriveError::RootImmutable);
        }
        Self::ensure_name_valid(new_name)?;

        let parent = match Self::fetch_in(&mut tx, new_parent_id).await? {
            Some(p) if !p.is_deleted && p.is_folder() => p,
            _ => return Err(DriveError::not_found(format!("folder {}", new_parent_id))),
        };
        if parent.owner_id != matter.owner_id {
            return Err(DriveError::CrossOwnerForbidden(new_parent_id));
        }

        let chain = Self::ancestor_chain_in(&mut tx, parent.id).await?;
        if chain.contains(&matter_id) {
            return Err(DriveError::CycleDetected {
                matter_id,
                new_parent_id,
            });
        }

        if matter.parent_id == Some(new_parent_id) && matter.name == new_name {
            return Ok(matter);
        }
        Self::ensure_no_live_sibling_in(&mut tx, new_parent_id, new_name, Some(matter_id))
            .await?;

        let moved = sqlx::query_as::<_, Matter>(&format!(
            "UPDATE matters SET parent_id = ?, name = ?, updated_at = ?
             WHERE id = ? RETURNING {}",
            MATTER_COLUMNS
        ))
        .bind(new_parent_id)
        .bind(new_name)
        .bind(Utc::now())
        .bind(matter_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DriveError::NameConflict {
                    parent_id: new_parent_id,
                    name: new_name.to_string(),
                }
            } else {
                DriveError::Sqlx(err)
            }
        })?;
        tx.commit().await?;

        tracing::debug!(matter = %matter_id, parent = %new_parent_id, name = new_name, "moved matter");
        Ok(moved)
    }

    /// Rename a matter in place.
    pub async fn rename(&self, matter_id: Uuid, new_name: &str, owner: Uuid) -> DriveResult<Matter> {
        let parent_id = {
            let mut conn = self.db.acquire().await?;
            let matter = Self::fetch_owned_in(&mut conn, matter_id, owner).await?;
            matter.parent_id.ok_or(DriveError::RootImmutable)?
        };
        self.move_to(matter_id, parent_id, new_name, owner).await
    }

    /// Set the deletion flag on one row. Never recursive.
    pub(crate) async fn soft_delete_in(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> DriveResult<Matter> {
        let now = Utc::now();
        sqlx::query_as::<_, Matter>(&format!(
            "UPDATE matters SET is_deleted = 1, deleted_at = ?, updated_at = ?
             WHERE id = ? AND is_deleted = 0 RETURNING {}",
            MATTER_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DriveError::not_found(format!("matter {}", id)))
    }

    /// Clear the deletion flag on one row.
    ///
    /// The parent must be live and no live sibling may hold the name.
    pub(crate) async fn restore_in(conn: &mut SqliteConnection, id: Uuid) -> DriveResult<Matter> {
        let matter = match Self::fetch_in(conn, id).await? {
            Some(m) if m.is_deleted => m,
            _ => return Err(DriveError::not_found(format!("deleted matter {}", id))),
        };
        let parent_id = matter.parent_id.ok_or(DriveError::RootImmutable)?;
        Self::fetch_parent_folder_in(conn, parent_id, matter.owner_id).await?;
        Self::ensure_no_live_sibling_in(conn, parent_id, &matter.name, Some(id)).await?;

        let restored = sqlx::query_as::<_, Matter>(&format!(
            "UPDATE matters SET is_deleted = 0, deleted_at = NULL, updated_at = ?
             WHERE id = ? AND is_deleted = 1 RETURNING {}",
            MATTER_COLUMNS
        ))
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DriveError::NameConflict {
                    parent_id,
                    name: matter.name.clone(),
                }
            } else {
                DriveError::Sqlx(err)
            }
        })?;
        Ok(restored)
    }

    /// Point a file at new content.
    pub(crate) async fn update_content_in(
        conn: &mut SqliteConnection,
        id: Uuid,
        hash: &str,
        size_bytes: i64,
    ) -> DriveResult<Matter> {
        sqlx::query_as::<_, Matter>(&format!(
            "UPDATE matters SET content_hash = ?, size_bytes = ?, updated_at = ?
             WHERE id = ? AND kind = 'FILE' AND is_deleted = 0 RETURNING {}",
            MATTER_COLUMNS
        ))
        .bind(hash)
        .bind(size_bytes)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DriveError::not_found(format!("file {}", id)))
    }

    pub(crate) async fn record_download_in(conn: &mut SqliteConnection, id: Uuid) -> DriveResult<()> {
        sqlx::query("UPDATE matters SET download_count = download_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Live children of a folder, unordered. Ignores ownership.
    pub(crate) async fn live_children_in(
        conn: &mut SqliteConnection,
        parent_id: Uuid,
    ) -> DriveResult<Vec<Matter>> {
        let rows = sqlx::query_as::<_, Matter>(&format!(
            "SELECT {} FROM matters WHERE parent_id = ? AND is_deleted = 0",
            MATTER_COLUMNS
        ))
        .bind(parent_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Ids of `id` and every descendant, deleted or not.
    pub(crate) async fn subtree_ids_in(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> DriveResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "WITH RECURSIVE subtree(id) AS (
                SELECT id FROM matters WHERE id = ?
                UNION
                SELECT m.id FROM matters m JOIN subtree s ON m.parent_id = s.id
             )
             SELECT id FROM subtree",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(ids)
    }

    /// Fetch a live matter visible to `caller`.
    pub async fn get(&self, matter_id: Uuid, caller: Uuid) -> DriveResult<Matter> {
        let mut conn = self.db.acquire().await?;
        Self::fetch_visible_in(&mut conn, matter_id, caller).await
    }

    /// List the children of a folder.
    ///
    /// Ordered by name case-insensitively, ties broken by creation time.
    /// Only the owner sees private or deleted children.
    pub async fn list_children(
        &self,
        parent_id: Uuid,
        caller: Uuid,
        include_deleted: bool,
    ) -> DriveResult<Vec<Matter>> {
        let mut conn = self.db.acquire().await?;
        let parent = Self::fetch_visible_in(&mut conn, parent_id, caller).await?;
        if !parent.is_folder() {
            return Err(DriveError::not_found(format!("folder {}", parent_id)));
        }
        let include_deleted = include_deleted && parent.owner_id == caller;

        let mut children = sqlx::query_as::<_, Matter>(&format!(
            "SELECT {} FROM matters WHERE parent_id = ? AND (is_deleted = 0 OR ?)",
            MATTER_COLUMNS
        ))
        .bind(parent_id)
        .bind(include_deleted)
        .fetch_all(&mut *conn)
        .await?;

        children.retain(|m| m.visible_to(caller));
        sort_for_listing(&mut children);
        Ok(children)
    }

    /// Total bytes of live files at or below `matter_id`, computed on demand.
    pub async fn folder_size(&self, matter_id: Uuid, caller: Uuid) -> DriveResult<i64> {
        let mut conn = self.db.acquire().await?;
        Self::fetch_visible_in(&mut conn, matter_id, caller).await?;
        let total: i64 = sqlx::query_scalar(
            "WITH RECURSIVE subtree(id) AS (
                SELECT id FROM matters WHERE id = ?
                UNION ALL
                SELECT m.id FROM matters m JOIN subtree s ON m.parent_id = s.id
                WHERE m.is_deleted = 0
             )
             SELECT COALESCE(SUM(m.size_bytes), 0) FROM matters m
             JOIN subtree s ON m.id = s.id
             WHERE m.kind = 'FILE' AND m.is_deleted = 0",
        )
        .bind(matter_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(total)
    }

    /// Slash-separated path from the owner's root, e.g. `/docs/a.txt`.
    pub async fn path(&self, matter_id: Uuid, caller: Uuid) -> DriveResult<String> {
        let mut conn = self.db.acquire().await?;
        Self::fetch_visible_in(&mut conn, matter_id, caller).await?;
        let chain = Self::ancestor_chain_in(&mut conn, matter_id).await?;

        let mut names = Vec::with_capacity(chain.len());
        for id in chain.iter().rev().skip(1) {
            let name: String = sqlx::query_scalar("SELECT name FROM matters WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
            names.push(name);
        }
        Ok(format!("/{}", names.join("/")))
    }

    /// Toggle whether non-owners may read a matter.
    pub async fn set_privacy(
        &self,
        matter_id: Uuid,
        owner: Uuid,
        is_private: bool,
    ) -> DriveResult<Matter> {
        let mut tx = self.db.begin().await?;
        Self::fetch_owned_in(&mut tx, matter_id, owner).await?;
        let updated = sqlx::query_as::<_, Matter>(&format!(
            "UPDATE matters SET is_private = ?, updated_at = ? WHERE id = ? RETURNING {}",
            MATTER_COLUMNS
        ))
        .bind(is_private)
        .bind(Utc::now())
        .bind(matter_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(updated)
    }
}

/// Case-insensitive name order, then creation time, then id.
pub(crate) fn sort_for_listing(matters: &mut [Matter]) {
    matters.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}
