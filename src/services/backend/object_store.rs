//! Object store backend speaking S3-style path requests over HTTP.
//!
//! The configured root is a bucket URL such as `http://store:3000/drive`;
//! each location maps to `PUT/GET/HEAD/DELETE {root}/{location}`.

use super::{ByteStream, StorageBackend, ensure_location_safe};
use crate::{
    config::BackendKind,
    services::error::{DriveError, DriveResult},
};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Body, Client, StatusCode};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct ObjectStoreBackend {
    client: Client,
    bucket_url: String,
}

impl ObjectStoreBackend {
    pub fn new(bucket_url: &str) -> DriveResult<Self> {
        let trimmed = bucket_url.trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(DriveError::StorageIo(format!(
                "object store root `{}` must be an http(s) URL",
                bucket_url
            )));
        }
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            bucket_url: trimmed.to_string(),
        })
    }

    fn url_for(&self, location: &str) -> DriveResult<String> {
        ensure_location_safe(location)?;
        Ok(format!("{}/{}", self.bucket_url, location))
    }

}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    /// A failed PUT leaves the location as it was. The location must not be
    /// deleted here: another upload of the same content may own it.
    async fn write(&self, location: &str, stream: ByteStream) -> DriveResult<u64> {
        let url = self.url_for(location)?;
        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);
        let counted = stream.inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });

        let result = self
            .client
            .put(&url)
            .body(Body::wrap_stream(counted))
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(err) => {
                warn!(location, error = %err, "object write failed");
                return Err(err.into());
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            return Err(DriveError::StorageIo(format!(
                "object store rejected write to `{}`: {}",
                location, status
            )));
        }

        let written = written.load(Ordering::Relaxed);
        debug!(location, bytes = written, "wrote object");
        Ok(written)
    }

    async fn read(&self, location: &str) -> DriveResult<ByteStream> {
        let url = self.url_for(location)?;
        let response = self.client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => {
                let stream = response.bytes_stream().map_err(io::Error::other);
                Ok(Box::pin(stream))
            }
            StatusCode::NOT_FOUND => Err(DriveError::not_found(format!("object `{}`", location))),
            status => Err(DriveError::StorageIo(format!(
                "object store read of `{}` failed: {}",
                location, status
            ))),
        }
    }

    async fn delete(&self, location: &str) -> DriveResult<()> {
        let url = self.url_for(location)?;
        let response = self.client.delete(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(location, "object already missing");
                Ok(())
            }
            status => Err(DriveError::StorageIo(format!(
                "object store delete of `{}` failed: {}",
                location, status
            ))),
        }
    }

    async fn exists(&self, location: &str) -> DriveResult<bool> {
        let url = self.url_for(location)?;
        let response = self.client.head(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(DriveError::StorageIo(format!(
                "object store head of `{}` failed: {}",
                location, status
            ))),
        }
    }
}
