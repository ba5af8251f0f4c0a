//! Stores wired to in-memory backends for unit tests.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use storage::{Driver, MemoryStorage, Metadata, Storage, StorageBucket, StorageError, StorageErrorKind};
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::blobs::BlobStore;
use crate::config::{StorageLayout, UploadConfig};
use crate::digest::Digest;
use crate::manifests::ManifestStore;
use crate::records::MemoryRecords;
use crate::uploads::UploadManager;

type Reader<'r> = dyn AsyncBufRead + Unpin + Send + Sync + 'r;
type Writer<'w> = dyn AsyncWrite + Unpin + Send + Sync + 'w;

pub(crate) struct Fixture {
    pub(crate) bucket: StorageBucket,
    pub(crate) records: Arc<MemoryRecords>,
    pub(crate) blobs: BlobStore,
    pub(crate) uploads: UploadManager,
    pub(crate) manifests: ManifestStore,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_config(UploadConfig::default())
    }

    pub(crate) fn with_timeout(timeout: Duration) -> Self {
        Self::with_config(UploadConfig {
            session_timeout_secs: timeout.as_secs(),
            ..UploadConfig::default()
        })
    }

    fn with_config(config: UploadConfig) -> Self {
        Self::with_storage(Storage::new(MemoryStorage::with_buckets(&["test"])), config)
    }

    /// Stores over `storage`, which must have a `test` bucket.
    pub(crate) fn with_storage(storage: Storage, config: UploadConfig) -> Self {
        let bucket = storage.bucket("test");
        let records = Arc::new(MemoryRecords::new());

        let blobs = BlobStore::new(bucket.clone(), records.clone(), StorageLayout::default());
        let uploads = UploadManager::new(blobs.clone(), records.clone(), config);
        let manifests = ManifestStore::new(blobs.clone(), records.clone());

        Self {
            bucket,
            records,
            blobs,
            uploads,
            manifests,
        }
    }

    /// Write `data` at its blob key without registering it.
    pub(crate) async fn put_object(&self, data: &[u8]) -> Digest {
        let digest = Digest::compute(data);
        let key = self.blobs.layout().blob_key(&digest);
        self.bucket.upload(&key, &mut &data[..]).await.unwrap();
        digest
    }

    /// Store and register a blob.
    pub(crate) async fn blob(&self, data: &[u8]) -> Digest {
        let digest = self.put_object(data).await;
        let key = self.blobs.layout().blob_key(&digest);
        self.blobs
            .create(&digest, data.len() as u64, &key, "application/octet-stream")
            .await
            .unwrap();
        digest
    }
}

/// In-memory storage whose server-side copies always fail.
#[derive(Debug)]
pub(crate) struct FailingCopy(pub(crate) MemoryStorage);

#[async_trait::async_trait]
impl Driver for FailingCopy {
    fn name(&self) -> &'static str {
        "failing-copy"
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.0.delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.0.metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.0.upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.0.download(bucket, remote, writer).await
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        offset: u64,
    ) -> Result<u64, StorageError> {
        self.0.append(bucket, remote, reader, offset).await
    }

    async fn copy(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        Err(StorageError::builder(
            self.name(),
            StorageErrorKind::Io,
            std::io::Error::other("copy refused"),
        )
        .bucket(bucket)
        .path(format!("{source} -> {destination}"))
        .build())
    }

    async fn list(&self, bucket: &str, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.0.list(bucket, prefix).await
    }
}
