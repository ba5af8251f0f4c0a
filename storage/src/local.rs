use std::io::SeekFrom;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use eyre::WrapErr;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::Instrument;

use storage_driver::{
    offset_mismatch, Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer,
};

/// Storage driver that keeps objects as files under a root directory.
///
/// Appends to the same file through one driver are serialized, so the offset
/// check and the write happen together. Appends to different files proceed
/// independently.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
    appends: DashMap<Utf8PathBuf, Arc<Mutex<()>>>,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. Buckets become directories below it.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            appends: DashMap::new(),
        }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path.push(remote);
        path
    }

    fn error(&self, err: eyre::Report) -> StorageError {
        let kind = err
            .downcast_ref::<std::io::Error>()
            .map(|err| err.kind().into())
            .unwrap_or(StorageErrorKind::Other);
        StorageError::new(self.name(), kind, err)
    }

    async fn create_parent(&self, path: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err("create_dir_all")
                .map_err(|err| self.error(err))?;
        }
        Ok(())
    }

    async fn append_locked(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        path: &Utf8Path,
        local: &mut Reader<'_>,
        offset: u64,
    ) -> Result<u64, StorageError> {
        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(StorageError::io(self.name(), err)),
        };
        if size != offset {
            return Err(offset_mismatch(self.name(), bucket, remote, offset, size));
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .wrap_err("open for append")
            .map_err(|err| self.error(err))?;
        let mut writer = tokio::io::BufWriter::new(file);

        let copied = async {
            let written = tokio::io::copy(local, &mut writer).await?;
            writer.shutdown().await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        let written = match copied {
            Ok(written) => written,
            Err(err) => {
                // Drop whatever part of the chunk reached the file.
                if let Err(error) = writer.get_mut().set_len(offset).await {
                    tracing::warn!(%remote, offset, %error, "Failed to truncate partial append");
                }
                return Err(self.error(eyre::Report::new(err).wrap_err("append")));
            }
        };

        tracing::trace!(%remote, offset, written, "Appended to file");
        Ok(offset + written)
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let remote = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(remote)
            .await
            .wrap_err("local driver: metadata")
            .map_err(|err| self.error(err))?;
        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .or_else(|_| metadata.modified())
                .wrap_err("metadata")
                .map_err(|err| self.error(err))?
                .into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);
        tokio::fs::remove_file(remote)
            .await
            .wrap_err("remove_file")
            .map_err(|err| self.error(err))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);
        self.create_parent(&remote).await?;

        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&remote)
                .await
                .wrap_err("local: open remote file")
                .map_err(|err| self.error(err))?,
        );

        tokio::io::copy(local, &mut writer)
            .await
            .wrap_err("copy")
            .map_err(|err| self.error(err))?;

        writer
            .shutdown()
            .await
            .wrap_err("shutdown writer")
            .map_err(|err| self.error(err))?;
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&remote)
                .await
                .wrap_err("open remote file")
                .map_err(|err| self.error(err))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .wrap_err("copy")
            .map_err(|err| self.error(err))?;

        local
            .flush()
            .await
            .wrap_err("flush writer")
            .map_err(|err| self.error(err))?;

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
        let path = self.path(bucket, remote);

        let mut file = tokio::fs::File::open(&path)
            .await
            .wrap_err("open remote file")
            .map_err(|err| self.error(err))?;
        let size = file
            .metadata()
            .await
            .wrap_err("metadata")
            .map_err(|err| self.error(err))?
            .len();
        storage_driver::checked_range(self.name(), remote, start, end, size)?;

        file.seek(SeekFrom::Start(start))
            .await
            .wrap_err("seek")
            .map_err(|err| self.error(err))?;

        let mut reader = tokio::io::BufReader::new(file).take(end - start + 1);
        tokio::io::copy(&mut reader, local)
            .await
            .wrap_err("copy range")
            .map_err(|err| self.error(err))?;

        local
            .flush()
            .await
            .wrap_err("flush writer")
            .map_err(|err| self.error(err))?;

        Ok(())
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
        offset: u64,
    ) -> Result<u64, StorageError> {
        let path = self.path(bucket, remote);
        self.create_parent(&path).await?;

        let lock = self.appends.entry(path.clone()).or_default().clone();
        let guard = lock.lock().await;
        let result = self.append_locked(bucket, remote, &path, local, offset).await;
        drop(guard);

        // The map and this call hold the only references when nobody is waiting.
        self.appends.remove_if(&path, |_, entry| Arc::strong_count(entry) == 2);
        result
    }

    async fn copy(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        let source = self.path(bucket, source);
        let destination = self.path(bucket, destination);
        self.create_parent(&destination).await?;

        tokio::fs::copy(&source, &destination)
            .await
            .wrap_err("copy file")
            .map_err(|err| self.error(err))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let mut root = self.root.join(bucket);
        root.push("b");

        let start = match prefix {
            Some(part) => root.join(part),
            None => root.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&root, &start))
            .in_current_span()
            .await
            .wrap_err("local driver")
            .map_err(|err| self.error(err))?
            .map_err(|err| self.error(err))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }
}

#[tracing::instrument]
fn collect_list(root: &Utf8Path, start: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    if start.is_dir() {
        visit(start, &mut files)?;
    }

    let mut items: Vec<Utf8PathBuf> = files
        .into_iter()
        .filter_map(|p| p.strip_prefix(root).ok().map(|p| p.to_owned()))
        .collect();
    items.sort();
    Ok(items)
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
