//! src/services/matter_service.rs
//!
//! MatterService: sequences catalog, dedup index and storage backend work so
//! that multi-store operations stay consistent without one transaction
//! spanning all three.
//!
//! Ordering rules:
//! - bytes are durable in the backend before a content record points at them
//! - the reference increment and the matter row commit in one transaction
//! - a soft delete and its reference decrement commit in one transaction
//! - `reclaim` removes bytes before the record, under the per-hash lock

use crate::{
    models::{content::ContentRecord, matter::Matter},
    services::{
        backend::{ByteStream, StorageBackend, content_location},
        catalog::MatterCatalog,
        dedup::DedupIndex,
        error::{DriveError, DriveResult},
        locks::HashLocks,
        staging::{StagedUpload, Staging},
    },
};
use bytes::Bytes;
use futures::Stream;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::{io, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many times the miss path rewrites bytes that vanished before publish.
const MAX_PUBLISH_ATTEMPTS: usize = 3;

/// Zero-referenced records fetched per reclamation batch.
const RECLAIM_BATCH: i64 = 256;

#[derive(Clone)]
pub struct MatterService {
    db: Arc<SqlitePool>,
    catalog: MatterCatalog,
    dedup: DedupIndex,
    backend: Arc<dyn StorageBackend>,
    staging: Staging,
    locks: HashLocks,
}

/// Outcome of a recursive delete.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeleteReport {
    pub matters_deleted: usize,
    pub references_released: usize,
}

/// Outcome of one reclamation sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReclaimStats {
    pub scanned: usize,
    pub reclaimed: usize,
    /// Records re-referenced between the scan and the lock.
    pub skipped: usize,
    /// Records whose bytes could not be deleted; retried next sweep.
    pub failed: usize,
    pub bytes_reclaimed: i64,
    pub interrupted: bool,
}

/// What a freshly published content reference is attached to.
enum Attach<'a> {
    NewFile {
        parent_id: Uuid,
        name: &'a str,
        owner: Uuid,
    },
    Replace {
        matter_id: Uuid,
        owner: Uuid,
    },
}

impl MatterService {
    pub fn new(db: Arc<SqlitePool>, backend: Arc<dyn StorageBackend>, staging: Staging) -> Self {
        Self {
            catalog: MatterCatalog::new(db.clone()),
            dedup: DedupIndex::new(db.clone()),
            db,
            backend,
            staging,
            locks: HashLocks::new(),
        }
    }

    pub fn catalog(&self) -> &MatterCatalog {
        &self.catalog
    }

    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn ensure_root(&self, owner: Uuid) -> DriveResult<Matter> {
        self.catalog.ensure_root(owner).await
    }

    pub async fn create_folder(&self, parent_id: Uuid, name: &str, owner: Uuid) -> DriveResult<Matter> {
        self.catalog.create_folder(parent_id, name, owner).await
    }

    pub async fn get(&self, matter_id: Uuid, caller: Uuid) -> DriveResult<Matter> {
        self.catalog.get(matter_id, caller).await
    }

    pub async fn list_children(
        &self,
        parent_id: Uuid,
        caller: Uuid,
        include_deleted: bool,
    ) -> DriveResult<Vec<Matter>> {
        self.catalog.list_children(parent_id, caller, include_deleted).await
    }

    pub async fn move_to(
        &self,
        matter_id: Uuid,
        new_parent_id: Uuid,
        new_name: &str,
        owner: Uuid,
    ) -> DriveResult<Matter> {
        self.catalog.move_to(matter_id, new_parent_id, new_name, owner).await
    }

    pub async fn rename(&self, matter_id: Uuid, new_name: &str, owner: Uuid) -> DriveResult<Matter> {
        self.catalog.rename(matter_id, new_name, owner).await
    }

    /// Upload a new file under `parent_id`.
    ///
    /// Bytes are staged and hashed first. If the request future is dropped
    /// while streaming, the staging guard removes the partial file and nothing
    /// is registered. Once staged, publishing runs on its own task so a
    /// disconnect cannot interrupt it halfway.
    pub async fn upload<S>(
        &self,
        parent_id: Uuid,
        name: &str,
        owner: Uuid,
        stream: S,
    ) -> DriveResult<Matter>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.catalog
            .ensure_placement_available(parent_id, name, owner)
            .await?;
        let staged = self.staging.stage(stream).await?;

        let service = self.clone();
        let name = name.to_string();
        let matter = tokio::spawn(async move {
            service
                .publish(
                    &staged,
                    Attach::NewFile {
                        parent_id,
                        name: &name,
                        owner,
                    },
                )
                .await
        })
        .await
        .map_err(|err| DriveError::StorageIo(format!("upload task failed: {}", err)))??;

        info!(matter = %matter.id, hash = ?matter.content_hash, bytes = matter.size_bytes, "uploaded file");
        Ok(matter)
    }

    /// Replace the content of an existing file.
    pub async fn replace_content<S>(
        &self,
        matter_id: Uuid,
        owner: Uuid,
        stream: S,
    ) -> DriveResult<Matter>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let current = self.catalog.get(matter_id, owner).await?;
        if current.owner_id != owner {
            return Err(DriveError::CrossOwnerForbidden(matter_id));
        }
        if current.is_folder() {
            return Err(DriveError::not_found(format!("file {}", matter_id)));
        }
        let staged = self.staging.stage(stream).await?;

        let service = self.clone();
        tokio::spawn(async move {
            service
                .publish(&staged, Attach::Replace { matter_id, owner })
                .await
        })
        .await
        .map_err(|err| DriveError::StorageIo(format!("replace task failed: {}", err)))?
    }

    /// Make the staged bytes referenced by a matter.
    ///
    /// Under the per-hash lock: reuse a record whose bytes are present,
    /// otherwise release the lock, write the bytes, and try again. The lock is
    /// never held across a backend write.
    async fn publish(&self, staged: &StagedUpload, attach: Attach<'_>) -> DriveResult<Matter> {
        let location = content_location(&staged.hash);

        for attempt in 0..=MAX_PUBLISH_ATTEMPTS {
            let wrote = attempt > 0;
            {
                let _guard = self.locks.lock(&staged.hash).await;
                let existing = self.dedup.resolve(&staged.hash).await?;
                let usable = match &existing {
                    Some(record) if record.ref_count > 0 => true,
                    // A zero-referenced record may have lost its bytes to an
                    // interrupted reclaim.
                    Some(record) => self.backend.exists(&record.location).await?,
                    None => wrote && self.backend.exists(&location).await?,
                };

                if usable {
                    let result = self.attach_reference(staged, &location, &attach).await;
                    if result.is_err() && existing.is_none() {
                        // Nothing references the blob we just wrote.
                        if let Err(err) = self.backend.delete(&location).await {
                            warn!(location, error = %err, "could not remove unpublished blob");
                        }
                    }
                    if result.is_ok() {
                        debug!(hash = %staged.hash, hit = existing.is_some(), "published content reference");
                    }
                    return result;
                }

                if let Some(stale) = existing {
                    let mut conn = self.db.acquire().await?;
                    DedupIndex::forget_stale_in(&mut conn, &stale.hash).await?;
                    warn!(hash = %stale.hash, "dropped content record whose bytes were missing");
                }
            }

            if attempt == MAX_PUBLISH_ATTEMPTS {
                break;
            }
            self.backend.write(&location, staged.open().await?).await?;
        }

        Err(DriveError::StorageIo(format!(
            "content {} disappeared from the backend after {} writes",
            staged.hash, MAX_PUBLISH_ATTEMPTS
        )))
    }

    /// Register the reference and attach it, in one transaction.
    async fn attach_reference(
        &self,
        staged: &StagedUpload,
        location: &str,
        attach: &Attach<'_>,
    ) -> DriveResult<Matter> {
        let mut tx = self.db.begin().await?;
        DedupIndex::register_or_increment_in(
            &mut tx,
            &staged.hash,
            location,
            staged.size_bytes,
            &staged.md5,
        )
        .await?;

        let matter = match attach {
            Attach::NewFile {
                parent_id,
                name,
                owner,
            } => {
                MatterCatalog::create_file_entry_in(
                    &mut tx,
                    *parent_id,
                    name,
                    *owner,
                    &staged.hash,
                    staged.size_bytes,
                )
                .await?
            }
            Attach::Replace { matter_id, owner } => {
                let current = MatterCatalog::fetch_owned_in(&mut tx, *matter_id, *owner).await?;
                let old_hash = current.content_hash.ok_or_else(|| {
                    DriveError::not_found(format!("file {}", matter_id))
                })?;
                DedupIndex::decrement_in(&mut tx, &old_hash).await?;
                MatterCatalog::update_content_in(&mut tx, *matter_id, &staged.hash, staged.size_bytes)
                    .await?
            }
        };

        tx.commit().await?;
        Ok(matter)
    }

    /// Open a file for streaming.
    ///
    /// Fails with `NotFound` for folders, deleted matters and matters the
    /// caller cannot see. Bumps the download counter.
    pub async fn download(
        &self,
        matter_id: Uuid,
        caller: Uuid,
    ) -> DriveResult<(Matter, ContentRecord, ByteStream)> {
        let matter = self.catalog.get(matter_id, caller).await?;
        self.open_content(matter).await
    }

    /// Resolve a live file to its record and a backend stream.
    pub(crate) async fn open_content(
        &self,
        matter: Matter,
    ) -> DriveResult<(Matter, ContentRecord, ByteStream)> {
        if matter.is_folder() || matter.is_deleted {
            return Err(DriveError::not_found(format!("file {}", matter.id)));
        }
        let hash = matter.content_hash.as_deref().ok_or_else(|| {
            DriveError::invariant(format!("file {} has no content hash", matter.id))
        })?;
        let record = self.dedup.resolve(hash).await?.ok_or_else(|| {
            DriveError::invariant(format!("file {} points at unknown content {}", matter.id, hash))
        })?;
        let stream = match self.backend.read(&record.location).await {
            Ok(stream) => stream,
            Err(DriveError::NotFound(_)) => {
                return Err(DriveError::invariant(format!(
                    "bytes for referenced content {} are missing",
                    hash
                )));
            }
            Err(err) => return Err(err),
        };

        {
            let mut conn = self.db.acquire().await?;
            MatterCatalog::record_download_in(&mut conn, matter.id).await?;
        }
        Ok((matter, record, stream))
    }

    /// Soft-delete a matter and every live descendant.
    ///
    /// Iterative post-order walk: children go before their folder, each in
    /// its own transaction pairing the soft delete with the reference
    /// decrement. An interrupted run leaves the folder live, so calling again
    /// resumes where it stopped.
    pub async fn delete_recursive(&self, matter_id: Uuid, owner: Uuid) -> DriveResult<DeleteReport> {
        {
            let mut conn = self.db.acquire().await?;
            let target = MatterCatalog::fetch_owned_in(&mut conn, matter_id, owner).await?;
            if target.is_root() {
                return Err(DriveError::RootImmutable);
            }
        }

        let mut report = DeleteReport::default();
        // (id, children already pushed)
        let mut frontier: Vec<(Uuid, bool)> = vec![(matter_id, false)];

        while let Some((id, expanded)) = frontier.pop() {
            let children = {
                let mut conn = self.db.acquire().await?;
                match MatterCatalog::fetch_in(&mut conn, id).await? {
                    Some(m) if !m.is_deleted => {
                        if m.is_folder() {
                            MatterCatalog::live_children_in(&mut conn, id).await?
                        } else {
                            Vec::new()
                        }
                    }
                    _ => continue,
                }
            };

            if children.is_empty() {
                if !self.delete_step(id, &mut report).await? {
                    frontier.push((id, true));
                }
                continue;
            }
            if expanded {
                debug!(folder = %id, "children appeared during delete, revisiting");
            }
            frontier.push((id, true));
            frontier.extend(children.into_iter().map(|c| (c.id, false)));
        }

        info!(
            matter = %matter_id,
            deleted = report.matters_deleted,
            released = report.references_released,
            "deleted subtree"
        );
        Ok(report)
    }

    /// Soft-delete one childless matter together with its reference decrement.
    ///
    /// Returns false if children appeared since the caller looked.
    async fn delete_step(&self, id: Uuid, report: &mut DeleteReport) -> DriveResult<bool> {
        let mut tx = self.db.begin().await?;
        if !MatterCatalog::live_children_in(&mut tx, id).await?.is_empty() {
            return Ok(false);
        }
        let deleted = match MatterCatalog::soft_delete_in(&mut tx, id).await {
            Ok(m) => m,
            Err(DriveError::NotFound(_)) => return Ok(true),
            Err(err) => return Err(err),
        };
        if let Some(hash) = deleted.content_hash.as_deref() {
            DedupIndex::decrement_in(&mut tx, hash).await?;
            report.references_released += 1;
        }
        tx.commit().await?;
        report.matters_deleted += 1;
        Ok(true)
    }

    /// Undo the soft delete of one matter.
    ///
    /// Folders are restored alone; their descendants stay deleted. A file
    /// takes its content reference back and fails with `NotFound` if that
    /// content has already been reclaimed.
    pub async fn restore(&self, matter_id: Uuid, owner: Uuid) -> DriveResult<Matter> {
        let matter = {
            let mut conn = self.db.acquire().await?;
            match MatterCatalog::fetch_in(&mut conn, matter_id).await? {
                Some(m) if m.is_deleted && m.owner_id == owner => m,
                _ => return Err(DriveError::not_found(format!("deleted matter {}", matter_id))),
            }
        };

        let Some(hash) = matter.content_hash.clone() else {
            let mut tx = self.db.begin().await?;
            let restored = MatterCatalog::restore_in(&mut tx, matter_id).await?;
            tx.commit().await?;
            return Ok(restored);
        };

        let _guard = self.locks.lock(&hash).await;
        let record = self
            .dedup
            .resolve(&hash)
            .await?
            .ok_or_else(|| DriveError::not_found(format!("content of {}", matter_id)))?;
        if record.ref_count == 0 && !self.backend.exists(&record.location).await? {
            return Err(DriveError::not_found(format!("content of {}", matter_id)));
        }

        let mut tx = self.db.begin().await?;
        let restored = MatterCatalog::restore_in(&mut tx, matter_id).await?;
        DedupIndex::increment_in(&mut tx, &hash).await?;
        tx.commit().await?;
        Ok(restored)
    }

    /// Permanently remove a soft-deleted matter and its descendants.
    ///
    /// References were already released by the soft delete. Share links on the
    /// removed rows go with them.
    pub async fn purge(&self, matter_id: Uuid, owner: Uuid) -> DriveResult<usize> {
        let mut tx = self.db.begin().await?;
        match MatterCatalog::fetch_in(&mut tx, matter_id).await? {
            Some(m) if m.is_deleted && m.owner_id == owner => {}
            _ => return Err(DriveError::not_found(format!("deleted matter {}", matter_id))),
        }

        let ids = MatterCatalog::subtree_ids_in(&mut tx, matter_id).await?;
        let live = count_live_in(&mut tx, &ids).await?;
        if live > 0 {
            return Err(DriveError::invariant(format!(
                "deleted matter {} still has {} live descendants",
                matter_id, live
            )));
        }

        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM matters WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let removed = builder.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        info!(matter = %matter_id, removed, "purged deleted matters");
        Ok(removed as usize)
    }

    /// Remove bytes and records of content nobody references.
    ///
    /// Each record is handled under its hash lock with the count re-checked,
    /// so a concurrent upload that revived it wins. The token is checked
    /// between records; a record is never left half-reclaimed by a stop.
    pub async fn reclaim(&self, cancel: &CancellationToken) -> DriveResult<ReclaimStats> {
        let mut stats = ReclaimStats::default();

        loop {
            let batch = self.dedup.list_zero_referenced(RECLAIM_BATCH).await?;
            if batch.is_empty() {
                break;
            }
            let mut progressed = false;

            for candidate in batch {
                if cancel.is_cancelled() {
                    stats.interrupted = true;
                    return Ok(stats);
                }
                stats.scanned += 1;

                let _guard = self.locks.lock(&candidate.hash).await;
                let current = match self.dedup.resolve(&candidate.hash).await? {
                    Some(record) if record.ref_count == 0 => record,
                    _ => {
                        stats.skipped += 1;
                        continue;
                    }
                };

                if let Err(err) = self.backend.delete(&current.location).await {
                    warn!(hash = %current.hash, error = %err, "could not reclaim content bytes");
                    stats.failed += 1;
                    continue;
                }
                if self.dedup.remove_if_unreferenced(&current.hash).await? {
                    stats.reclaimed += 1;
                    stats.bytes_reclaimed += current.size_bytes;
                    progressed = true;
                }
            }

            if !progressed {
                break;
            }
        }

        if stats.reclaimed > 0 {
            info!(
                reclaimed = stats.reclaimed,
                bytes = stats.bytes_reclaimed,
                "reclaimed unreferenced content"
            );
        }
        Ok(stats)
    }

    /// Run `reclaim` every `every` until `cancel` fires.
    pub fn spawn_reclaimer(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                match service.reclaim(&cancel).await {
                    Ok(stats) => debug!(?stats, "reclaim sweep finished"),
                    Err(err) => warn!(error = %err, "reclaim sweep failed"),
                }
            }
            debug!("reclaimer stopped");
        })
    }
}

async fn count_live_in(conn: &mut SqliteConnection, ids: &[Uuid]) -> DriveResult<i64> {
    let mut builder =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM matters WHERE is_deleted = 0 AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    let count: i64 = builder.build_query_scalar().fetch_one(&mut *conn).await?;
    Ok(count)
}
