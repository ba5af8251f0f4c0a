//! Persistence for blob, manifest and upload session records.
//!
//! Each trait method is one atomic unit of work against the backend. Stores
//! never hold a lock of their own across calls; compare-and-set operations
//! such as [`SessionRecords::record_progress`] carry the expected current
//! state instead.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::blobs::Blob;
use crate::digest::Digest;
use crate::manifests::Manifest;
use crate::uploads::{SessionState, UploadSession};

mod memory;

pub use memory::MemoryRecords;

/// Failures of the record backend.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A record with the same key already exists.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// The backend itself failed.
    #[error("record backend failure: {0}")]
    Backend(String),
}

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Aggregate counts over all blob records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobStats {
    /// Number of blobs.
    pub count: u64,
    /// Sum of blob sizes in bytes.
    pub total_size: u64,
}

/// Aggregate counts over manifest records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStats {
    /// Number of manifest rows.
    pub manifests: u64,
    /// Number of distinct repositories.
    pub repositories: u64,
    /// Number of distinct repository and tag pairs.
    pub tags: u64,
}

/// Aggregate counts over live upload sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Sessions in the ACTIVE state.
    pub active: u64,
    /// Bytes received by ACTIVE sessions and not yet promoted.
    pub bytes_in_flight: u64,
}

/// Blob records, keyed by digest.
#[async_trait::async_trait]
pub trait BlobRecords: fmt::Debug + Send + Sync {
    /// Look up a blob record.
    async fn get(&self, digest: &Digest) -> RecordResult<Option<Blob>>;

    /// Insert `blob` unless a record for its digest exists, returning whichever is stored.
    async fn insert_if_absent(&self, blob: Blob) -> RecordResult<Blob>;

    /// Remove a blob record, returning it when it existed.
    async fn remove(&self, digest: &Digest) -> RecordResult<Option<Blob>>;

    /// Count and total size of all blobs.
    async fn stats(&self) -> RecordResult<BlobStats>;
}

/// Manifest records, keyed by repository and digest, with optional tags.
#[async_trait::async_trait]
pub trait ManifestRecords: fmt::Debug + Send + Sync {
    /// Look up a manifest by digest within a repository.
    async fn by_digest(&self, repository: &str, digest: &Digest)
    -> RecordResult<Option<Manifest>>;

    /// Every manifest written under a tag, newest first.
    async fn by_tag(&self, repository: &str, tag: &str) -> RecordResult<Vec<Manifest>>;

    /// Insert `manifest` unless its repository and digest are already stored,
    /// returning whichever is stored.
    async fn insert_if_absent(&self, manifest: Manifest) -> RecordResult<Manifest>;

    /// Remove the manifest with this digest, returning the number of rows removed.
    async fn remove_by_digest(&self, repository: &str, digest: &Digest) -> RecordResult<usize>;

    /// Remove every manifest row carrying this tag, returning the number removed.
    async fn remove_by_tag(&self, repository: &str, tag: &str) -> RecordResult<usize>;

    /// Distinct tags in a repository, sorted.
    async fn tags(&self, repository: &str) -> RecordResult<Vec<String>>;

    /// Counts for one repository, or for all of them.
    async fn stats(&self, repository: Option<&str>) -> RecordResult<ManifestStats>;
}

/// Upload session records, keyed by session id.
#[async_trait::async_trait]
pub trait SessionRecords: fmt::Debug + Send + Sync {
    /// Store a new session. Fails with [`RecordError::Conflict`] if the id is taken.
    async fn insert(&self, session: UploadSession) -> RecordResult<()>;

    /// Look up a session.
    async fn get(&self, id: &str) -> RecordResult<Option<UploadSession>>;

    /// Advance `bytes_received` from `from` to `to`, provided the session is
    /// still ACTIVE and has received exactly `from` bytes.
    ///
    /// Returns the updated session, or `None` if the session is gone or
    /// the expectation does not hold.
    async fn record_progress(
        &self,
        id: &str,
        from: u64,
        to: u64,
        at: DateTime<Utc>,
    ) -> RecordResult<Option<UploadSession>>;

    /// Move a session from `from` to `to`. Returns false if the session is
    /// gone or was not in `from`.
    ///
    /// `touched`, when given, becomes the session's last activity. A state
    /// change without it keeps the idle clock running.
    async fn transition(
        &self,
        id: &str,
        from: SessionState,
        to: SessionState,
        touched: Option<DateTime<Utc>>,
    ) -> RecordResult<bool>;

    /// Remove a session, returning it when it existed.
    async fn remove(&self, id: &str) -> RecordResult<Option<UploadSession>>;

    /// Remove every session whose last activity is before `cutoff`,
    /// returning the removed sessions.
    ///
    /// A COMPLETED session counts its claim as activity, so one left behind
    /// by an interrupted completion is removed once the claim is stale.
    async fn remove_inactive(&self, cutoff: DateTime<Utc>) -> RecordResult<Vec<UploadSession>>;

    /// Counts over ACTIVE sessions.
    async fn summary(&self) -> RecordResult<SessionSummary>;
}
