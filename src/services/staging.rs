//! Staging area for uploads whose hash is not yet known.
//!
//! Bytes are streamed to `staging_root/.upload-{uuid}` while SHA-256 and MD5
//! are computed. The returned [`StagedUpload`] owns the file and removes it on
//! drop, which covers every failure path and cancelled request futures.

use crate::services::{
    backend::ByteStream,
    error::{DriveError, DriveResult},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Staging {
    root: PathBuf,
}

/// A fully received upload sitting in the staging area.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    /// Lowercase hex SHA-256.
    pub hash: String,
    /// Lowercase hex MD5.
    pub md5: String,
    pub size_bytes: i64,
}

impl Staging {
    pub async fn new(root: impl Into<PathBuf>) -> DriveResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream `stream` into a new staging file, hashing as it goes.
    pub async fn stage<S>(&self, stream: S) -> DriveResult<StagedUpload>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let path = self.root.join(format!(".upload-{}", Uuid::new_v4()));
        let mut file = File::create(&path).await?;
        // From here on the guard owns cleanup.
        let mut staged = StagedUpload {
            path,
            hash: String::new(),
            md5: String::new(),
            size_bytes: 0,
        };

        let mut sha = Sha256::new();
        let mut md5 = md5::Context::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| {
                DriveError::StorageIo(format!("upload stream failed: {}", err))
            })?;
            staged.size_bytes += chunk.len() as i64;
            sha.update(&chunk);
            md5.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        staged.hash = hex::encode(sha.finalize());
        staged.md5 = format!("{:x}", md5.compute());
        debug!(hash = %staged.hash, bytes = staged.size_bytes, "staged upload");
        Ok(staged)
    }

    /// Staging files currently on disk. Used by readiness checks and tests.
    pub async fn pending(&self) -> DriveResult<usize> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(".upload-") {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl StagedUpload {
    /// Re-open the staged bytes as a stream for the backend.
    pub async fn open(&self) -> DriveResult<ByteStream> {
        let file = File::open(&self.path).await?;
        Ok(Box::pin(ReaderStream::new(file)))
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed staging file {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                "failed to remove staging file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn stage_hashes_and_cleans_up_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::new(dir.path()).await.unwrap();

        let staged = staging
            .stage(stream::iter(vec![
                Ok(Bytes::from_static(b"hel")),
                Ok(Bytes::from_static(b"lo")),
            ]))
            .await
            .unwrap();
        assert_eq!(
            staged.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(staged.md5, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(staged.size_bytes, 5);
        assert_eq!(staging.pending().await.unwrap(), 1);

        drop(staged);
        assert_eq!(staging.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stream_error_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::new(dir.path()).await.unwrap();

        let err = staging
            .stage(stream::iter(vec![
                Ok(Bytes::from_static(b"partial")),
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "disconnect")),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::StorageIo(_)));
        assert_eq!(staging.pending().await.unwrap(), 0);
    }
}
