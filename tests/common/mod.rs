#![allow(dead_code)]

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use matter_drive::{
    db,
    services::{
        backend::{ByteStream, LocalBackend, StorageBackend},
        matter_service::MatterService,
        staging::Staging,
    },
};
use std::{io, path::Path, sync::Arc};
use tempfile::TempDir;
use uuid::Uuid;

/// A service over an in-memory catalog and temp-dir storage.
pub struct TestDrive {
    pub service: MatterService,
    pub blobs: TempDir,
    pub staging: TempDir,
}

impl TestDrive {
    pub async fn new() -> Self {
        let pool = Arc::new(db::connect_in_memory().await.unwrap());
        let blobs = tempfile::tempdir().unwrap();
        let staging_dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> =
            Arc::new(LocalBackend::new(blobs.path()).await.unwrap());
        let staging = Staging::new(staging_dir.path()).await.unwrap();
        Self {
            service: MatterService::new(pool, backend, staging),
            blobs,
            staging: staging_dir,
        }
    }

    /// Root folder of a fresh owner.
    pub async fn new_owner(&self) -> (Uuid, Uuid) {
        let owner = Uuid::new_v4();
        let root = self.service.ensure_root(owner).await.unwrap();
        (owner, root.id)
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        count_files(self.blobs.path())
    }
}

pub fn body(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send {
    // Two chunks so chunk boundaries are exercised.
    let mid = data.len() / 2;
    stream::iter(vec![
        Ok(Bytes::from_static(&data[..mid])),
        Ok(Bytes::from_static(&data[mid..])),
    ])
}

pub fn failing_body() -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ])
}

pub async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

pub const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
