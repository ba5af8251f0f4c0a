//! Resumable blob uploads.
//!
//! An upload session owns one temporary object. Chunks are appended to it
//! strictly in order; on completion the whole object is re-hashed, and only
//! when the digest matches is it copied to its content-addressed key and
//! registered with the [`BlobStore`].
//!
//! ```text
//!            append_chunk
//!             +-------+
//!             v       |
//! start --> ACTIVE ---+--- complete --> COMPLETED --> (removed)
//!             |
//!             +--- idle past timeout --> EXPIRED --> (reclaimed)
//! ```

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use storage::{StorageBucket, StorageErrorKind};
use tokio::io::AsyncBufRead;

use crate::blobs::{Blob, BlobStore};
use crate::config::UploadConfig;
use crate::digest::{Digest, DigestWriter};
use crate::error::{RegistryError, RegistryResult};
use crate::range::RangeSpec;
use crate::records::{SessionRecords, SessionSummary};

const BLOB_CONTENT_TYPE: &str = "application/octet-stream";

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Accepting chunks.
    Active,
    /// Claimed by a completion; about to be removed.
    Completed,
    /// Idle for longer than the session timeout; awaiting reclamation.
    Expired,
}

/// An upload in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Opaque session id.
    pub id: String,
    /// Repository the upload was started in.
    pub repository: String,
    /// Key of the temporary object.
    pub temp_key: Utf8PathBuf,
    /// Bytes appended to the temporary object so far.
    pub bytes_received: u64,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
    /// When the session last accepted a chunk.
    pub last_activity_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: SessionState,
}

impl UploadSession {
    fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        (now - self.last_activity_at)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }
}

/// Snapshot of an upload for status queries.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatus {
    /// Repository the upload belongs to.
    pub repository: String,
    /// Bytes received so far.
    pub bytes_received: u64,
    /// Lifecycle state.
    pub state: SessionState,
}

impl From<UploadSession> for UploadStatus {
    fn from(session: UploadSession) -> Self {
        Self {
            repository: session.repository,
            bytes_received: session.bytes_received,
            state: session.state,
        }
    }
}

/// Coordinates upload sessions and promotes finished uploads into blobs.
#[derive(Debug, Clone)]
pub struct UploadManager {
    blobs: BlobStore,
    records: Arc<dyn SessionRecords>,
    config: UploadConfig,
}

impl UploadManager {
    /// Create an upload manager writing into `blobs`' bucket.
    pub fn new(blobs: BlobStore, records: Arc<dyn SessionRecords>, config: UploadConfig) -> Self {
        Self {
            blobs,
            records,
            config,
        }
    }

    /// Upload settings.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    fn storage(&self) -> &StorageBucket {
        self.blobs.storage()
    }

    /// Open a new, empty upload session.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, repository: &str) -> RegistryResult<UploadSession> {
        crate::validate_repository(repository)?;

        let id = uuid::Uuid::new_v4().to_string();
        let temp_key = self.blobs.layout().upload_key(&id);
        self.storage().upload(&temp_key, &mut &b""[..]).await?;

        let now = Utc::now();
        let session = UploadSession {
            id,
            repository: repository.to_owned(),
            temp_key,
            bytes_received: 0,
            started_at: now,
            last_activity_at: now,
            state: SessionState::Active,
        };
        self.records.insert(session.clone()).await?;

        tracing::info!(session = %session.id, "Upload started");
        Ok(session)
    }

    /// Load a session that is still accepting work, expiring it if it has
    /// been idle too long.
    async fn active(&self, id: &str) -> RegistryResult<UploadSession> {
        let session = self
            .records
            .get(id)
            .await?
            .filter(|session| session.state == SessionState::Active)
            .ok_or_else(|| RegistryError::SessionNotFound(id.to_owned()))?;

        let now = Utc::now();
        if session.is_idle(now, self.config.session_timeout()) {
            self.records
                .transition(id, SessionState::Active, SessionState::Expired, None)
                .await?;
            tracing::info!(session = %id, "Upload expired");
            return Err(RegistryError::SessionNotFound(id.to_owned()));
        }

        Ok(session)
    }

    /// Append a chunk which the client declares to cover `declared`.
    ///
    /// The chunk must start exactly where the upload left off. The new
    /// received count is what storage reports after the write, whatever the
    /// declared end was.
    #[tracing::instrument(skip(self, reader, declared), fields(start = declared.start, end = declared.end))]
    pub async fn append_chunk<R>(
        &self,
        id: &str,
        reader: &mut R,
        declared: &RangeSpec,
    ) -> RegistryResult<UploadSession>
    where
        R: AsyncBufRead + Unpin + Send + Sync,
    {
        let session = self.active(id).await?;
        if declared.start != session.bytes_received {
            return Err(RegistryError::RangeMismatch {
                expected: session.bytes_received,
                actual: declared.start,
            });
        }

        let size = match self
            .storage()
            .append(&session.temp_key, reader, session.bytes_received)
            .await
        {
            Ok(size) => size,
            Err(error) if error.kind() == StorageErrorKind::OffsetMismatch => {
                tracing::warn!(%error, "Temporary object is not where the session left it");
                return Err(RegistryError::RangeMismatch {
                    expected: session.bytes_received,
                    actual: declared.start,
                });
            }
            Err(error) => return Err(error.into()),
        };

        let written = size - session.bytes_received;
        if written != declared.len() {
            tracing::warn!(
                declared = declared.len(),
                written,
                "Chunk length disagrees with declared range"
            );
        }

        match self
            .records
            .record_progress(id, session.bytes_received, size, Utc::now())
            .await?
        {
            Some(updated) => {
                tracing::debug!(received = updated.bytes_received, "Chunk accepted");
                Ok(updated)
            }
            None => {
                // The session was reclaimed or cancelled while the write ran.
                if self.records.get(id).await?.is_none() {
                    self.discard(&session.temp_key).await;
                }
                Err(RegistryError::SessionNotFound(id.to_owned()))
            }
        }
    }

    /// Verify the uploaded bytes against `expected` and promote them to a blob.
    ///
    /// On a digest mismatch the session and its temporary object are left
    /// untouched so the client can retry.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, id: &str, expected: &str) -> RegistryResult<Blob> {
        let expected = Digest::parse(expected)?;
        let session = self.active(id).await?;

        let mut hasher = DigestWriter::new();
        match self.storage().download(&session.temp_key, &mut hasher).await {
            Ok(()) => {}
            // A cancel or sweep removed the session after it was loaded.
            Err(error) if error.is_not_found() => {
                return Err(RegistryError::SessionNotFound(id.to_owned()));
            }
            Err(error) => return Err(error.into()),
        }
        let (actual, size) = hasher.finish();

        if size != session.bytes_received {
            tracing::warn!(
                recorded = session.bytes_received,
                stored = size,
                "Temporary object size disagrees with session"
            );
        }
        if actual != expected {
            tracing::warn!(%expected, %actual, "Upload digest mismatch");
            return Err(RegistryError::DigestMismatch { expected, actual });
        }
        if size == 0 {
            return Err(RegistryError::InvalidArgument("upload is empty".into()));
        }

        if !self
            .records
            .transition(id, SessionState::Active, SessionState::Completed, Some(Utc::now()))
            .await?
        {
            return Err(RegistryError::SessionNotFound(id.to_owned()));
        }

        let blob = match self.promote(&session, &actual, size).await {
            Ok(blob) => blob,
            Err(error) => {
                self.release(id).await;
                return Err(error);
            }
        };

        self.discard(&session.temp_key).await;
        self.records.remove(id).await?;

        tracing::info!(session = %id, digest = %blob.digest, size = blob.size, "Upload completed");
        Ok(blob)
    }

    async fn promote(&self, session: &UploadSession, digest: &Digest, size: u64) -> RegistryResult<Blob> {
        let key = self.blobs.layout().blob_key(digest);
        if !self.blobs.exists(digest).await? {
            self.storage().copy(&session.temp_key, &key).await?;
        }
        self.blobs.create(digest, size, &key, BLOB_CONTENT_TYPE).await
    }

    async fn release(&self, id: &str) {
        match self
            .records
            .transition(id, SessionState::Completed, SessionState::Active, Some(Utc::now()))
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(session = %id, "Session vanished during promotion"),
            Err(error) => tracing::warn!(session = %id, %error, "Failed to release session"),
        }
    }

    async fn discard(&self, key: &Utf8Path) {
        match self.storage().delete(key).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {}
            Err(error) => tracing::warn!(%key, %error, "Failed to delete temporary object"),
        }
    }

    /// Abandon an upload. Returns false if there is no such session, or if a
    /// completion has already claimed it.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> RegistryResult<bool> {
        // Moving out of ACTIVE first keeps a concurrent completion from claiming it.
        if !self
            .records
            .transition(id, SessionState::Active, SessionState::Expired, None)
            .await?
        {
            match self.records.get(id).await? {
                Some(session) if session.state == SessionState::Expired => {}
                _ => return Ok(false),
            }
        }

        let Some(session) = self.records.remove(id).await? else {
            return Ok(false);
        };
        self.discard(&session.temp_key).await;

        tracing::info!(session = %id, "Upload cancelled");
        Ok(true)
    }

    /// Current state of an upload.
    ///
    /// A session idle past the timeout is reported as expired.
    #[tracing::instrument(skip(self))]
    pub async fn status(&self, id: &str) -> RegistryResult<UploadStatus> {
        let mut session = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| RegistryError::SessionNotFound(id.to_owned()))?;

        if session.state == SessionState::Active
            && session.is_idle(Utc::now(), self.config.session_timeout())
        {
            session.state = SessionState::Expired;
        }
        Ok(session.into())
    }

    /// Remove every session idle since before `now - timeout`, along with
    /// its temporary object. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn reclaim_expired(&self, now: DateTime<Utc>, timeout: Duration) -> RegistryResult<usize> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|err| RegistryError::Internal(format!("session timeout out of range: {err}")))?;

        let removed = self.records.remove_inactive(now - timeout).await?;
        for session in &removed {
            self.discard(&session.temp_key).await;
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Reclaimed expired uploads");
        }
        Ok(removed.len())
    }

    /// [`reclaim_expired`](Self::reclaim_expired) with the current time and configured timeout.
    pub async fn reclaim(&self) -> RegistryResult<usize> {
        self.reclaim_expired(Utc::now(), self.config.session_timeout())
            .await
    }

    /// Counts over active uploads.
    pub async fn stats(&self) -> RegistryResult<SessionSummary> {
        Ok(self.records.summary().await?)
    }
}

#[cfg(test)]
mod tests {
    use storage::{MemoryStorage, Storage};

    use super::*;
    use crate::fixture::{FailingCopy, Fixture};

    async fn chunk(
        uploads: &UploadManager,
        id: &str,
        start: u64,
        data: &[u8],
    ) -> RegistryResult<UploadSession> {
        let range = RangeSpec::new(start, start + data.len() as u64 - 1);
        let mut reader = data;
        uploads.append_chunk(id, &mut reader, &range).await
    }

    #[tokio::test]
    async fn chunks_must_be_contiguous() {
        let fixture = Fixture::new();
        let uploads = &fixture.uploads;
        let session = uploads.start("library/alpine").await.unwrap();
        assert_eq!(session.bytes_received, 0);
        assert_eq!(session.state, SessionState::Active);

        let err = chunk(uploads, &session.id, 3, b"abc").await.unwrap_err();
        assert!(matches!(err, RegistryError::RangeMismatch { expected: 0, actual: 3 }));

        let updated = chunk(uploads, &session.id, 0, b"hello").await.unwrap();
        assert_eq!(updated.bytes_received, 5);

        let err = chunk(uploads, &session.id, 0, b"again").await.unwrap_err();
        assert!(matches!(err, RegistryError::RangeMismatch { expected: 5, actual: 0 }));
        let err = chunk(uploads, &session.id, 6, b"gap").await.unwrap_err();
        assert!(matches!(err, RegistryError::RangeMismatch { expected: 5, .. }));

        let updated = chunk(uploads, &session.id, 5, b" world").await.unwrap();
        assert_eq!(updated.bytes_received, 11);
    }

    #[tokio::test]
    async fn received_count_comes_from_storage() {
        let fixture = Fixture::new();
        let session = fixture.uploads.start("repo").await.unwrap();

        // Declares ten bytes, delivers four.
        let mut reader = &b"abcd"[..];
        let updated = fixture
            .uploads
            .append_chunk(&session.id, &mut reader, &RangeSpec::new(0, 9))
            .await
            .unwrap();
        assert_eq!(updated.bytes_received, 4);
    }

    #[tokio::test]
    async fn digest_mismatch_preserves_session() {
        let fixture = Fixture::new();
        let uploads = &fixture.uploads;
        let data = b"some layer content";
        let session = uploads.start("repo").await.unwrap();
        chunk(uploads, &session.id, 0, data).await.unwrap();

        let wrong = Digest::compute(b"other content");
        let err = uploads.complete(&session.id, wrong.as_str()).await.unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));

        let status = uploads.status(&session.id).await.unwrap();
        assert_eq!(status.bytes_received, data.len() as u64);
        assert_eq!(status.state, SessionState::Active);
        assert!(fixture.bucket.exists(&session.temp_key).await.unwrap());

        let digest = Digest::compute(data);
        let blob = uploads.complete(&session.id, digest.as_str()).await.unwrap();
        assert_eq!(blob.digest, digest);
        assert_eq!(blob.size, data.len() as u64);
        assert_eq!(&fixture.blobs.read(&digest).await.unwrap()[..], data);

        assert!(!fixture.bucket.exists(&session.temp_key).await.unwrap());
        let err = uploads.status(&session.id).await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
        let err = uploads.complete(&session.id, digest.as_str()).await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn complete_rejects_bad_digest_and_empty_upload() {
        let fixture = Fixture::new();
        let session = fixture.uploads.start("repo").await.unwrap();

        let err = fixture
            .uploads
            .complete(&session.id, "sha256:ABC")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDigest(_)));

        let empty = Digest::compute(b"");
        let err = fixture
            .uploads
            .complete(&session.id, empty.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        assert!(fixture.uploads.status(&session.id).await.is_ok());
    }

    #[tokio::test]
    async fn completing_known_blob_reuses_record() {
        let fixture = Fixture::new();
        let digest = fixture.blob(b"shared layer").await;
        let existing = fixture.blobs.get(&digest).await.unwrap();

        let session = fixture.uploads.start("other").await.unwrap();
        chunk(&fixture.uploads, &session.id, 0, b"shared layer").await.unwrap();
        let blob = fixture.uploads.complete(&session.id, digest.as_str()).await.unwrap();

        assert_eq!(blob, existing);
        assert_eq!(fixture.blobs.stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn cancel_removes_session_and_object() {
        let fixture = Fixture::new();
        let session = fixture.uploads.start("repo").await.unwrap();
        chunk(&fixture.uploads, &session.id, 0, b"partial").await.unwrap();

        assert!(fixture.uploads.cancel(&session.id).await.unwrap());
        assert!(!fixture.bucket.exists(&session.temp_key).await.unwrap());
        assert!(!fixture.uploads.cancel(&session.id).await.unwrap());

        let err = chunk(&fixture.uploads, &session.id, 7, b"more").await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn idle_sessions_expire_lazily() {
        let fixture = Fixture::with_timeout(Duration::ZERO);
        let session = fixture.uploads.start("repo").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(
            fixture.uploads.status(&session.id).await.unwrap().state,
            SessionState::Expired
        );
        let err = chunk(&fixture.uploads, &session.id, 0, b"late").await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
        assert_eq!(fixture.uploads.stats().await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn sweep_reclaims_only_idle_sessions() {
        let fixture = Fixture::new();
        let stale = fixture.uploads.start("repo").await.unwrap();
        chunk(&fixture.uploads, &stale.id, 0, b"abandoned").await.unwrap();
        let fresh = fixture.uploads.start("repo").await.unwrap();

        let timeout = Duration::from_secs(1800);
        let later = Utc::now() + chrono::Duration::seconds(1801);
        let touched = fixture
            .records
            .record_progress(&fresh.id, 0, 0, later)
            .await
            .unwrap();
        assert!(touched.is_some());

        let removed = fixture.uploads.reclaim_expired(later, timeout).await.unwrap();
        assert_eq!(removed, 1);

        assert!(matches!(
            fixture.uploads.status(&stale.id).await.unwrap_err(),
            RegistryError::SessionNotFound(_)
        ));
        assert!(!fixture.bucket.exists(&stale.temp_key).await.unwrap());
        assert!(fixture.bucket.exists(&fresh.temp_key).await.unwrap());
        assert_eq!(fixture.uploads.stats().await.unwrap().active, 1);

        assert_eq!(fixture.uploads.reclaim_expired(later, timeout).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lazily_expired_session_is_swept() {
        let fixture = Fixture::new();
        let timeout = fixture.uploads.config().session_timeout();
        let session = fixture.uploads.start("repo").await.unwrap();
        chunk(&fixture.uploads, &session.id, 0, b"idle").await.unwrap();

        let idle_since = Utc::now() - chrono::Duration::hours(1);
        fixture
            .records
            .record_progress(&session.id, 4, 4, idle_since)
            .await
            .unwrap()
            .unwrap();

        let err = chunk(&fixture.uploads, &session.id, 4, b"late").await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
        let expired = fixture.records.get(&session.id).await.unwrap().unwrap();
        assert_eq!(expired.state, SessionState::Expired);
        assert_eq!(expired.last_activity_at, idle_since);

        assert_eq!(fixture.uploads.reclaim_expired(Utc::now(), timeout).await.unwrap(), 1);
        assert!(fixture.records.get(&session.id).await.unwrap().is_none());
        assert!(!fixture.bucket.exists(&session.temp_key).await.unwrap());
    }

    #[tokio::test]
    async fn interrupted_completion_is_swept() {
        let fixture = Fixture::new();
        let timeout = fixture.uploads.config().session_timeout();
        let session = fixture.uploads.start("repo").await.unwrap();
        chunk(&fixture.uploads, &session.id, 0, b"orphan").await.unwrap();

        let claimed_at = Utc::now() - chrono::Duration::hours(1);
        assert!(
            fixture
                .records
                .transition(
                    &session.id,
                    SessionState::Active,
                    SessionState::Completed,
                    Some(claimed_at)
                )
                .await
                .unwrap()
        );
        assert!(!fixture.uploads.cancel(&session.id).await.unwrap());

        assert_eq!(fixture.uploads.reclaim_expired(Utc::now(), timeout).await.unwrap(), 1);
        assert!(fixture.records.get(&session.id).await.unwrap().is_none());
        assert!(!fixture.bucket.exists(&session.temp_key).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_chunks_at_same_offset() {
        let fixture = Fixture::new();
        let session = fixture.uploads.start("repo").await.unwrap();

        let (a, b) = tokio::join!(
            chunk(&fixture.uploads, &session.id, 0, b"hello"),
            chunk(&fixture.uploads, &session.id, 0, b"world"),
        );
        let results = [a, b];
        let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].bytes_received, 5);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(RegistryError::RangeMismatch { actual: 0, .. })))
        );

        let status = fixture.uploads.status(&session.id).await.unwrap();
        assert_eq!(status.bytes_received, 5);
    }

    #[tokio::test]
    async fn complete_races_cancel() {
        let fixture = Fixture::new();
        let data = b"contested layer";
        let digest = Digest::compute(data);
        let session = fixture.uploads.start("repo").await.unwrap();
        chunk(&fixture.uploads, &session.id, 0, data).await.unwrap();

        let (completed, cancelled) = tokio::join!(
            fixture.uploads.complete(&session.id, digest.as_str()),
            fixture.uploads.cancel(&session.id),
        );
        match (completed, cancelled.unwrap()) {
            (Ok(blob), false) => {
                assert_eq!(blob.digest, digest);
                assert!(fixture.blobs.exists(&digest).await.unwrap());
            }
            (Err(RegistryError::SessionNotFound(_)), true) => {
                assert!(!fixture.blobs.exists(&digest).await.unwrap());
            }
            (completed, cancelled) => {
                panic!("both or neither won: {completed:?}, cancelled={cancelled}")
            }
        }
        assert!(fixture.records.get(&session.id).await.unwrap().is_none());
        assert!(!fixture.bucket.exists(&session.temp_key).await.unwrap());
    }

    #[tokio::test]
    async fn complete_races_complete() {
        let fixture = Fixture::new();
        let data = b"twice completed";
        let digest = Digest::compute(data);
        let session = fixture.uploads.start("repo").await.unwrap();
        chunk(&fixture.uploads, &session.id, 0, data).await.unwrap();

        let (a, b) = tokio::join!(
            fixture.uploads.complete(&session.id, digest.as_str()),
            fixture.uploads.complete(&session.id, digest.as_str()),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(RegistryError::SessionNotFound(_))))
        );
        assert_eq!(fixture.blobs.stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn failed_promotion_releases_session() {
        let storage = Storage::new(FailingCopy(MemoryStorage::with_buckets(&["test"])));
        let fixture = Fixture::with_storage(storage, UploadConfig::default());
        let data = b"never promoted";
        let digest = Digest::compute(data);
        let session = fixture.uploads.start("repo").await.unwrap();
        chunk(&fixture.uploads, &session.id, 0, data).await.unwrap();

        let err = fixture
            .uploads
            .complete(&session.id, digest.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Storage(_)));

        let status = fixture.uploads.status(&session.id).await.unwrap();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.bytes_received, data.len() as u64);
        assert!(fixture.bucket.exists(&session.temp_key).await.unwrap());
        assert!(!fixture.blobs.exists(&digest).await.unwrap());

        assert!(fixture.uploads.cancel(&session.id).await.unwrap());
    }
}
