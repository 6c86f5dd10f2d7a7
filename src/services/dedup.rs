//! Content deduplication index: content hash → physical blob, reference counted.

use crate::{
    models::content::ContentRecord,
    services::error::{DriveError, DriveResult},
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

const CONTENT_COLUMNS: &str = "hash, location, size_bytes, md5, ref_count, created_at, updated_at";

#[derive(Clone)]
pub struct DedupIndex {
    db: Arc<SqlitePool>,
}

impl DedupIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn resolve(&self, hash: &str) -> DriveResult<Option<ContentRecord>> {
        let mut conn = self.db.acquire().await?;
        Self::resolve_in(&mut conn, hash).await
    }

    pub(crate) async fn resolve_in(
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> DriveResult<Option<ContentRecord>> {
        let record = sqlx::query_as::<_, ContentRecord>(&format!(
            "SELECT {} FROM content_records WHERE hash = ?",
            CONTENT_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(record)
    }

    /// Create the record with one reference, or add a reference to the
    /// existing one.
    ///
    /// When the hash is already present the supplied location, size and md5
    /// are ignored. The upsert is a single statement, so racing callers never
    /// double-create or lose an increment.
    pub async fn register_or_increment(
        &self,
        hash: &str,
        location: &str,
        size_bytes: i64,
        md5: &str,
    ) -> DriveResult<ContentRecord> {
        let mut conn = self.db.acquire().await?;
        Self::register_or_increment_in(&mut conn, hash, location, size_bytes, md5).await
    }

    pub(crate) async fn register_or_increment_in(
        conn: &mut SqliteConnection,
        hash: &str,
        location: &str,
        size_bytes: i64,
        md5: &str,
    ) -> DriveResult<ContentRecord> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, ContentRecord>(&format!(
            "INSERT INTO content_records (
                hash, location, size_bytes, md5, ref_count, created_at, updated_at
             ) VALUES (?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT(hash) DO UPDATE SET
                ref_count = ref_count + 1,
                updated_at = excluded.updated_at
             RETURNING {}",
            CONTENT_COLUMNS
        ))
        .bind(hash)
        .bind(location)
        .bind(size_bytes)
        .bind(md5)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(record)
    }

    /// Add a reference to an existing record. `NotFound` if it is gone.
    pub(crate) async fn increment_in(
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> DriveResult<ContentRecord> {
        sqlx::query_as::<_, ContentRecord>(&format!(
            "UPDATE content_records SET ref_count = ref_count + 1, updated_at = ?
             WHERE hash = ? RETURNING {}",
            CONTENT_COLUMNS
        ))
        .bind(Utc::now())
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DriveError::not_found(format!("content {}", hash)))
    }

    pub async fn decrement(&self, hash: &str) -> DriveResult<ContentRecord> {
        let mut conn = self.db.acquire().await?;
        Self::decrement_in(&mut conn, hash).await
    }

    /// Drop one reference.
    ///
    /// Fails with `InvariantViolation` when the record is missing or already at
    /// zero: the caller's bookkeeping is wrong, not the user's request.
    pub(crate) async fn decrement_in(
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> DriveResult<ContentRecord> {
        let updated = sqlx::query_as::<_, ContentRecord>(&format!(
            "UPDATE content_records SET ref_count = ref_count - 1, updated_at = ?
             WHERE hash = ? AND ref_count > 0 RETURNING {}",
            CONTENT_COLUMNS
        ))
        .bind(Utc::now())
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => match Self::resolve_in(conn, hash).await? {
                Some(_) => Err(DriveError::invariant(format!(
                    "reference count of {} would go negative",
                    hash
                ))),
                None => Err(DriveError::invariant(format!(
                    "decrement of unknown content {}",
                    hash
                ))),
            },
        }
    }

    /// Records nobody references any more, oldest first.
    pub async fn list_zero_referenced(&self, limit: i64) -> DriveResult<Vec<ContentRecord>> {
        let rows = sqlx::query_as::<_, ContentRecord>(&format!(
            "SELECT {} FROM content_records WHERE ref_count = 0
             ORDER BY updated_at ASC LIMIT ?",
            CONTENT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Delete the record if it is still unreferenced. Returns whether a row
    /// was removed.
    pub(crate) async fn remove_if_unreferenced(&self, hash: &str) -> DriveResult<bool> {
        let result = sqlx::query("DELETE FROM content_records WHERE hash = ? AND ref_count = 0")
            .bind(hash)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop a zero-referenced record whose bytes are known to be gone.
    pub(crate) async fn forget_stale_in(
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> DriveResult<()> {
        sqlx::query("DELETE FROM content_records WHERE hash = ? AND ref_count = 0")
            .bind(hash)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
