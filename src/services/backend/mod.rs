//! Byte storage behind the dedup index.
//!
//! Every backend stores opaque blobs at relative, `/`-separated locations and
//! offers the same four capabilities. The concrete backend is chosen once at
//! startup from [`StorageConfig`].

pub mod local;
pub mod object_store;

use crate::{
    config::{BackendKind, StorageConfig},
    services::error::{DriveError, DriveResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin, sync::Arc};

pub use local::LocalBackend;
pub use object_store::ObjectStoreBackend;

/// A boxed stream of byte chunks, used both for writes and reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Uniform byte storage contract.
///
/// - `write` either makes the full stream visible at `location` or leaves
///   nothing there.
/// - `delete` on an absent location succeeds.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Store `stream` at `location`, returning the number of bytes written.
    async fn write(&self, location: &str, stream: ByteStream) -> DriveResult<u64>;

    /// Open `location` for streaming. `NotFound` if nothing is stored there.
    async fn read(&self, location: &str) -> DriveResult<ByteStream>;

    async fn delete(&self, location: &str) -> DriveResult<()>;

    async fn exists(&self, location: &str) -> DriveResult<bool>;
}

/// Build the backend named by the configuration.
pub async fn from_config(cfg: &StorageConfig) -> DriveResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match cfg.backend_kind {
        BackendKind::Local => Arc::new(LocalBackend::new(&cfg.backend_location_root).await?),
        BackendKind::ObjectStore => {
            Arc::new(ObjectStoreBackend::new(&cfg.backend_location_root)?)
        }
    };
    tracing::info!(
        kind = ?cfg.backend_kind,
        root = %cfg.backend_location_root,
        "storage backend ready"
    );
    Ok(backend)
}

/// Content-addressed location for a SHA-256 hex digest: `ab/cd/<hash>`.
pub fn content_location(hash: &str) -> String {
    let shard_a = hash.get(0..2).unwrap_or("00");
    let shard_b = hash.get(2..4).unwrap_or("00");
    format!("{}/{}/{}", shard_a, shard_b, hash)
}

/// Reject locations that could escape the backend root.
///
/// Same rules as object keys: non-empty, relative, no `..`, no backslashes or
/// control characters.
pub(crate) fn ensure_location_safe(location: &str) -> DriveResult<()> {
    let invalid = location.is_empty()
        || location.starts_with('/')
        || location.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        || location
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\');
    if invalid {
        return Err(DriveError::StorageIo(format!(
            "invalid storage location `{}`",
            location
        )));
    }
    Ok(())
}
