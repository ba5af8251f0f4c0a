//! Content-addressed blob storage.
//!
//! A blob is visible only through its record, and a record is only created
//! once the verified object is in place at its final key. Reads treat a
//! record whose object has gone missing as an unknown blob.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use storage::{StorageBucket, StorageError};
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

use crate::config::StorageLayout;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::records::{BlobRecords, BlobStats};

const STREAM_BUFFER: usize = 64 * 1024;

/// A stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Content digest, the blob's identity.
    pub digest: Digest,
    /// Size in bytes, always positive.
    pub size: u64,
    /// Object key in the storage bucket.
    pub storage_key: Utf8PathBuf,
    /// Media type recorded at creation.
    pub content_type: String,
    /// Creation time of the record.
    pub created_at: DateTime<Utc>,
}

/// Blob repository over an object store bucket and a record backend.
#[derive(Debug, Clone)]
pub struct BlobStore {
    storage: StorageBucket,
    records: Arc<dyn BlobRecords>,
    layout: StorageLayout,
}

impl BlobStore {
    /// Create a blob store.
    pub fn new(storage: StorageBucket, records: Arc<dyn BlobRecords>, layout: StorageLayout) -> Self {
        Self {
            storage,
            records,
            layout,
        }
    }

    /// Object key layout.
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub(crate) fn storage(&self) -> &StorageBucket {
        &self.storage
    }

    /// Whether a record exists for `digest`.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        Ok(self.records.get(digest).await?.is_some())
    }

    /// Fetch a blob whose backing object is present.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn get(&self, digest: &Digest) -> RegistryResult<Blob> {
        let blob = self
            .records
            .get(digest)
            .await?
            .ok_or_else(|| RegistryError::BlobNotFound(digest.clone()))?;

        match self.storage.exists(&blob.storage_key).await? {
            true => Ok(blob),
            false => {
                tracing::warn!(key = %blob.storage_key, "Blob record present but object missing");
                Err(RegistryError::BlobNotFound(digest.clone()))
            }
        }
    }

    /// Stream bytes `start..=end` of a blob.
    ///
    /// The returned reader yields exactly `end - start + 1` bytes, or an
    /// error if storage fails part way through.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn open_range(&self, digest: &Digest, start: u64, end: u64) -> RegistryResult<BlobReader> {
        let blob = self.get(digest).await?;
        if end < start || end >= blob.size {
            return Err(RegistryError::RangeNotSatisfiable { size: blob.size });
        }

        let (mut writer, reader) = tokio::io::duplex(STREAM_BUFFER);
        let storage = self.storage.clone();
        let key = blob.storage_key.clone();
        let task = tokio::spawn(async move {
            storage.download_range(&key, start, end, &mut writer).await
        });

        Ok(BlobReader {
            inner: reader,
            task: Some(task),
            len: end - start + 1,
        })
    }

    /// Read a whole blob into memory. Intended for small documents.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn read(&self, digest: &Digest) -> RegistryResult<Bytes> {
        let blob = self.get(digest).await?;
        let mut buf = Vec::with_capacity(blob.size as usize);
        self.storage
            .download(&blob.storage_key, &mut buf)
            .await
            .map_err(|err| not_found_or(err, digest))?;
        Ok(buf.into())
    }

    /// Register a blob whose object already sits at `storage_key`.
    ///
    /// Returns the existing record unchanged if the digest is already known.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn create(
        &self,
        digest: &Digest,
        size: u64,
        storage_key: &Utf8Path,
        content_type: &str,
    ) -> RegistryResult<Blob> {
        if size == 0 {
            return Err(RegistryError::InvalidArgument("blob size must be positive".into()));
        }
        if storage_key.as_str().is_empty() {
            return Err(RegistryError::InvalidArgument("blob storage key is empty".into()));
        }

        if let Some(existing) = self.records.get(digest).await? {
            tracing::debug!("Blob already registered");
            return Ok(existing);
        }

        if !self.storage.exists(storage_key).await? {
            return Err(RegistryError::InvalidArgument(format!(
                "no object at {storage_key}"
            )));
        }

        let blob = self
            .records
            .insert_if_absent(Blob {
                digest: digest.clone(),
                size,
                storage_key: storage_key.to_owned(),
                content_type: content_type.to_owned(),
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(size = blob.size, key = %blob.storage_key, "Blob created");
        Ok(blob)
    }

    /// Remove a blob record and then its object.
    ///
    /// Returns false if there was no record. A failure to remove the object
    /// is logged and otherwise ignored.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn delete(&self, digest: &Digest) -> RegistryResult<bool> {
        let Some(blob) = self.records.remove(digest).await? else {
            return Ok(false);
        };

        if let Err(error) = self.storage.delete(&blob.storage_key).await {
            tracing::warn!(key = %blob.storage_key, %error, "Failed to delete blob object");
        }
        tracing::info!("Blob deleted");
        Ok(true)
    }

    /// Count and total size of all blobs.
    pub async fn stats(&self) -> RegistryResult<BlobStats> {
        Ok(self.records.stats().await?)
    }

    /// Whether the backing object has the size recorded for the blob.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn verify(&self, digest: &Digest) -> RegistryResult<bool> {
        let blob = self
            .records
            .get(digest)
            .await?
            .ok_or_else(|| RegistryError::BlobNotFound(digest.clone()))?;

        let metadata = self
            .storage
            .metadata(&blob.storage_key)
            .await
            .map_err(|err| not_found_or(err, digest))?;

        if metadata.size != blob.size {
            tracing::warn!(
                expected = blob.size,
                actual = metadata.size,
                "Blob object size disagrees with record"
            );
        }
        Ok(metadata.size == blob.size)
    }
}

fn not_found_or(error: StorageError, digest: &Digest) -> RegistryError {
    if error.is_not_found() {
        RegistryError::BlobNotFound(digest.clone())
    } else {
        error.into()
    }
}

/// Streaming reader over a byte range of a blob.
///
/// Bytes are fed from a background download. If that download fails, the
/// failure is reported once the bytes it managed to deliver are consumed.
pub struct BlobReader {
    inner: DuplexStream,
    task: Option<JoinHandle<Result<(), StorageError>>>,
    len: u64,
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader")
            .field("len", &self.len)
            .field("finished", &self.task.is_none())
            .finish()
    }
}

impl BlobReader {
    /// Number of bytes the reader will produce.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the reader produces no bytes. Ranges are never empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            return Poll::Ready(Ok(()));
        }

        // End of stream: only report it once the download has finished cleanly.
        let Some(task) = this.task.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let outcome = ready!(Pin::new(task).poll(cx));
        this.task = None;
        match outcome {
            Ok(Ok(())) => Poll::Ready(Ok(())),
            Ok(Err(error)) => Poll::Ready(Err(std::io::Error::other(error))),
            Err(error) => Poll::Ready(Err(std::io::Error::other(error))),
        }
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
