use std::{fmt, ops::Deref, sync::Arc};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::io::{self, AsyncWriteExt};

use crate::error::{StorageError, StorageErrorKind};

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for file contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// File object metadata, which will be generically provided by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes.
    pub size: u64,

    /// The creation timestamp of the file.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides the ability to interact with a storage backend.
///
/// Objects are addressed by a bucket and a path within that bucket. Besides
/// whole-object upload and download, drivers support ranged reads, appends
/// at an explicit offset and server-side copies, which is what resumable
/// uploads are built from.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Delete a file from the storage, by path.
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for a file, by path.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Check whether a file exists.
    ///
    /// A [`StorageErrorKind::NotFound`] from [`Driver::metadata`] means `false`,
    /// any other failure is returned.
    async fn exists(&self, bucket: &str, remote: &Utf8Path) -> Result<bool, StorageError> {
        match self.metadata(bucket, remote).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Upload a file to the storage, using a reader stream to provide the contents.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Download a file from storage, into a writer stream.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// Download the inclusive byte range `start..=end` of a file into a writer stream.
    ///
    /// Fails with [`StorageErrorKind::InvalidRequest`] when the range does not
    /// lie within the file.
    async fn download_range(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        start: u64,
        end: u64,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        self.download(bucket, remote, &mut buf).await?;
        let range = checked_range(self.name(), remote, start, end, buf.len() as u64)?;

        writer
            .write_all(&buf[range])
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;
        writer
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;
        Ok(())
    }

    /// Append the contents of a reader to a file, at `offset`.
    ///
    /// The file is created when it does not exist and `offset` is zero. When
    /// the current size of the file is not `offset`, nothing is written and the
    /// call fails with [`StorageErrorKind::OffsetMismatch`].
    ///
    /// Returns the size of the file after the write.
    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        offset: u64,
    ) -> Result<u64, StorageError>;

    /// Copy a file to a new path within the same bucket.
    async fn copy(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        tracing::trace!(%source, %destination, "Copying through a buffer");
        let mut buf = Vec::new();
        self.download(bucket, source, &mut buf).await?;
        self.upload(bucket, destination, &mut buf.as_slice()).await
    }

    /// List the files in a bucket, optionally filtered by a prefix.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;
}

/// Validate an inclusive byte range against an object size, returning the
/// equivalent half-open range.
pub fn checked_range(
    engine: &'static str,
    remote: &Utf8Path,
    start: u64,
    end: u64,
    size: u64,
) -> Result<std::ops::Range<usize>, StorageError> {
    if end < start || end >= size {
        return Err(StorageError::builder(
            engine,
            StorageErrorKind::InvalidRequest,
            format!("range {start}-{end} outside of object of {size} bytes"),
        )
        .path(remote.as_str())
        .build());
    }

    Ok(start as usize..(end + 1) as usize)
}

/// Build the error an append returns when `offset` does not match the current size.
pub fn offset_mismatch(
    engine: &'static str,
    bucket: &str,
    remote: &Utf8Path,
    offset: u64,
    size: u64,
) -> StorageError {
    StorageError::builder(
        engine,
        StorageErrorKind::OffsetMismatch,
        format!("append at offset {offset}, but object is {size} bytes"),
    )
    .bucket(bucket)
    .path(remote.as_str())
    .build()
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, remote).await
    }

    async fn exists(&self, bucket: &str, remote: &Utf8Path) -> Result<bool, StorageError> {
        self.deref().exists(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, remote, writer).await
    }

    async fn download_range(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        start: u64,
        end: u64,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref()
            .download_range(bucket, remote, start, end, writer)
            .await
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        offset: u64,
    ) -> Result<u64, StorageError> {
        self.deref().append(bucket, remote, reader, offset).await
    }

    async fn copy(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().copy(bucket, source, destination).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, prefix).await
    }
}
