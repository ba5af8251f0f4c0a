use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{
    checked_range, offset_mismatch, Driver, Metadata, Reader, StorageError, StorageErrorKind,
    Writer,
};

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MemoryFileItem {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores files in memory.
///
/// Every operation runs under a single lock, so appends, copies and deletes
/// are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Create a new bucket in the storage.
    pub async fn create_bucket(&self, bucket: String) {
        let mut buckets = self.buckets.write().await;
        buckets.insert(bucket, HashMap::new());
    }

    fn bucket_not_found(&self, bucket: &str) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            format!("Bucket not found: {bucket}"),
        )
        .bucket(bucket)
        .build()
    }

    fn path_not_found(&self, bucket: &str, remote: &Utf8Path) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            format!("Path not found: {remote}"),
        )
        .bucket(bucket)
        .path(remote.as_str())
        .build()
    }

    async fn read_all(&self, reader: &mut Reader<'_>) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        tokio::io::copy(reader, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.bucket_not_found(bucket))?;
        Ok(bucket_map
            .get(remote)
            .ok_or_else(|| self.path_not_found(bucket, remote))?
            .into())
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.bucket_not_found(bucket))?;
        bucket_map.remove(remote);

        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let buf = self.read_all(local).await?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.bucket_not_found(bucket))?;
        let mut buf = bucket_map
            .get(remote)
            .ok_or_else(|| self.path_not_found(bucket, remote))?
            .as_ref();

        tokio::io::copy(&mut buf, local)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        Ok(())
    }

    async fn download_range(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        start: u64,
        end: u64,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        // Copy the slice out so the lock is not held while the writer applies backpressure.
        let chunk = {
            let buckets = self.buckets.read().await;
            let item = buckets
                .get(bucket)
                .ok_or_else(|| self.bucket_not_found(bucket))?
                .get(remote)
                .ok_or_else(|| self.path_not_found(bucket, remote))?;
            let range = checked_range(self.name(), remote, start, end, item.data.len() as u64)?;
            item.data[range].to_vec()
        };

        local
            .write_all(&chunk)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;
        local
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        Ok(())
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
        offset: u64,
    ) -> Result<u64, StorageError> {
        let buf = self.read_all(local).await?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        match bucket_map.get_mut(remote) {
            Some(item) => {
                let size = item.data.len() as u64;
                if size != offset {
                    return Err(offset_mismatch(self.name(), bucket, remote, offset, size));
                }
                item.data.extend_from_slice(&buf);
                Ok(item.data.len() as u64)
            }
            None if offset == 0 => {
                let size = buf.len() as u64;
                bucket_map.insert(remote.to_owned(), buf.into());
                Ok(size)
            }
            None => Err(offset_mismatch(self.name(), bucket, remote, offset, 0)),
        }
    }

    async fn copy(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.bucket_not_found(bucket))?;
        let data = bucket_map
            .get(source)
            .ok_or_else(|| self.path_not_found(bucket, source))?
            .data
            .clone();
        bucket_map.insert(destination.to_owned(), data.into());

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.bucket_not_found(bucket))?;

        let mut paths: Vec<String> = bucket_map
            .keys()
            .filter(|path| prefix.is_none_or(|prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect();
        paths.sort();

        Ok(paths)
    }
}
