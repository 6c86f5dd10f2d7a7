//! Local filesystem backend.
//!
//! Blobs live at `root/{location}`. Writes stream into a temporary file next
//! to the destination and are renamed into place only after a successful
//! fsync, so a failed write never leaves visible bytes.

use super::{ByteStream, StorageBackend, ensure_location_safe};
use crate::{
    config::BackendKind,
    services::error::{DriveError, DriveResult},
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
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
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create the backend, making sure `root` exists.
    pub async fn new(root: impl Into<PathBuf>) -> DriveResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &str) -> DriveResult<PathBuf> {
        ensure_location_safe(location)?;
        Ok(location
            .split('/')
            .fold(self.root.clone(), |path, seg| path.join(seg)))
    }

    /// Create `tmp_path`, recreating its directory if a concurrent prune
    /// removed it in between.
    async fn create_tmp(tmp_path: &Path) -> io::Result<File> {
        match File::create(tmp_path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if let Some(parent) = tmp_path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                File::create(tmp_path).await
            }
            other => other,
        }
    }

    /// Copy the stream into `file`, flushing and syncing at the end.
    async fn write_tmp(mut file: File, mut stream: ByteStream) -> io::Result<u64> {
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Remove empty directories from `start` up to, not including, the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn write(&self, location: &str, stream: ByteStream) -> DriveResult<u64> {
        let file_path = self.path_for(location)?;
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            DriveError::StorageIo("storage path missing parent directory".into())
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let file = Self::create_tmp(&tmp_path).await?;
        let written = match Self::write_tmp(file, stream).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(location, bytes = written, "wrote blob");
        Ok(written)
    }

    async fn read(&self, location: &str) -> DriveResult<ByteStream> {
        let file_path = self.path_for(location)?;
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                DriveError::not_found(format!("blob at `{}`", location))
            } else {
                DriveError::from(err)
            }
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn delete(&self, location: &str) -> DriveResult<()> {
        let file_path = self.path_for(location)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn exists(&self, location: &str) -> DriveResult<bool> {
        let file_path = self.path_for(location)?;
        Ok(fs::try_exists(&file_path).await?)
    }
}
