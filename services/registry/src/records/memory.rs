use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    BlobRecords, BlobStats, ManifestRecords, ManifestStats, RecordError, RecordResult,
    SessionRecords, SessionSummary,
};
use crate::blobs::Blob;
use crate::digest::Digest;
use crate::manifests::Manifest;
use crate::uploads::{SessionState, UploadSession};

#[derive(Debug, Default)]
struct Tables {
    blobs: HashMap<Digest, Blob>,
    // Insertion order breaks ties between manifests created at the same instant.
    manifests: Vec<Manifest>,
    sessions: HashMap<String, UploadSession>,
}

/// In-process record backend.
///
/// All three record kinds share one lock, so every call is atomic with
/// respect to every other.
#[derive(Debug, Default)]
pub struct MemoryRecords {
    tables: RwLock<Tables>,
}

impl MemoryRecords {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlobRecords for MemoryRecords {
    async fn get(&self, digest: &Digest) -> RecordResult<Option<Blob>> {
        Ok(self.tables.read().await.blobs.get(digest).cloned())
    }

    async fn insert_if_absent(&self, blob: Blob) -> RecordResult<Blob> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .blobs
            .entry(blob.digest.clone())
            .or_insert(blob)
            .clone())
    }

    async fn remove(&self, digest: &Digest) -> RecordResult<Option<Blob>> {
        Ok(self.tables.write().await.blobs.remove(digest))
    }

    async fn stats(&self) -> RecordResult<BlobStats> {
        let tables = self.tables.read().await;
        Ok(BlobStats {
            count: tables.blobs.len() as u64,
            total_size: tables.blobs.values().map(|blob| blob.size).sum(),
        })
    }
}

#[async_trait::async_trait]
impl ManifestRecords for MemoryRecords {
    async fn by_digest(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> RecordResult<Option<Manifest>> {
        let tables = self.tables.read().await;
        Ok(tables
            .manifests
            .iter()
            .find(|m| m.repository == repository && &m.digest == digest)
            .cloned())
    }

    async fn by_tag(&self, repository: &str, tag: &str) -> RecordResult<Vec<Manifest>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Manifest> = tables
            .manifests
            .iter()
            .rev()
            .filter(|m| m.repository == repository && m.tag.as_deref() == Some(tag))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_if_absent(&self, manifest: Manifest) -> RecordResult<Manifest> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .manifests
            .iter()
            .find(|m| m.repository == manifest.repository && m.digest == manifest.digest)
        {
            return Ok(existing.clone());
        }

        tables.manifests.push(manifest.clone());
        Ok(manifest)
    }

    async fn remove_by_digest(&self, repository: &str, digest: &Digest) -> RecordResult<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.manifests.len();
        tables
            .manifests
            .retain(|m| !(m.repository == repository && &m.digest == digest));
        Ok(before - tables.manifests.len())
    }

    async fn remove_by_tag(&self, repository: &str, tag: &str) -> RecordResult<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.manifests.len();
        tables
            .manifests
            .retain(|m| !(m.repository == repository && m.tag.as_deref() == Some(tag)));
        Ok(before - tables.manifests.len())
    }

    async fn tags(&self, repository: &str) -> RecordResult<Vec<String>> {
        let tables = self.tables.read().await;
        let tags: BTreeSet<&str> = tables
            .manifests
            .iter()
            .filter(|m| m.repository == repository)
            .filter_map(|m| m.tag.as_deref())
            .collect();
        Ok(tags.into_iter().map(str::to_owned).collect())
    }

    async fn stats(&self, repository: Option<&str>) -> RecordResult<ManifestStats> {
        let tables = self.tables.read().await;
        let rows = tables
            .manifests
            .iter()
            .filter(|m| repository.is_none_or(|repo| m.repository == repo));

        let mut stats = ManifestStats::default();
        let mut repositories = HashSet::new();
        let mut tags = HashSet::new();
        for row in rows {
            stats.manifests += 1;
            repositories.insert(row.repository.as_str());
            if let Some(tag) = &row.tag {
                tags.insert((row.repository.as_str(), tag.as_str()));
            }
        }
        stats.repositories = repositories.len() as u64;
        stats.tags = tags.len() as u64;
        Ok(stats)
    }
}

#[async_trait::async_trait]
impl SessionRecords for MemoryRecords {
    async fn insert(&self, session: UploadSession) -> RecordResult<()> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(RecordError::Conflict(session.id));
        }
        tables.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> RecordResult<Option<UploadSession>> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn record_progress(
        &self,
        id: &str,
        from: u64,
        to: u64,
        at: DateTime<Utc>,
    ) -> RecordResult<Option<UploadSession>> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(id) {
            Some(session)
                if session.state == SessionState::Active && session.bytes_received == from =>
            {
                session.bytes_received = to;
                session.last_activity_at = at;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: &str,
        from: SessionState,
        to: SessionState,
        touched: Option<DateTime<Utc>>,
    ) -> RecordResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(id) {
            Some(session) if session.state == from => {
                session.state = to;
                if let Some(at) = touched {
                    session.last_activity_at = at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> RecordResult<Option<UploadSession>> {
        Ok(self.tables.write().await.sessions.remove(id))
    }

    async fn remove_inactive(&self, cutoff: DateTime<Utc>) -> RecordResult<Vec<UploadSession>> {
        let mut tables = self.tables.write().await;
        let stale: Vec<String> = tables
            .sessions
            .values()
            .filter(|s| s.last_activity_at < cutoff)
            .map(|s| s.id.clone())
            .collect();

        Ok(stale
            .iter()
            .filter_map(|id| tables.sessions.remove(id))
            .collect())
    }

    async fn summary(&self) -> RecordResult<SessionSummary> {
        let tables = self.tables.read().await;
        let mut summary = SessionSummary::default();
        for session in tables.sessions.values() {
            if session.state == SessionState::Active {
                summary.active += 1;
                summary.bytes_in_flight += session.bytes_received;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use camino::Utf8PathBuf;
    use chrono::Duration;

    use super::*;

    fn manifest(repository: &str, tag: Option<&str>, body: &str, at: DateTime<Utc>) -> Manifest {
        Manifest {
            digest: Digest::compute(body.as_bytes()),
            repository: repository.into(),
            tag: tag.map(Into::into),
            content: Bytes::copy_from_slice(body.as_bytes()),
            media_type: "application/vnd.oci.image.manifest.v1+json".into(),
            created_at: at,
        }
    }

    fn session(id: &str, state: SessionState, at: DateTime<Utc>) -> UploadSession {
        UploadSession {
            id: id.into(),
            repository: "repo".into(),
            temp_key: Utf8PathBuf::from(format!("uploads/{id}.tmp")),
            bytes_received: 0,
            started_at: at,
            last_activity_at: at,
            state,
        }
    }

    #[tokio::test]
    async fn blob_insert_is_idempotent() {
        let records = MemoryRecords::new();
        let digest = Digest::compute(b"abc");
        let first = Blob {
            digest: digest.clone(),
            size: 3,
            storage_key: "blobs/a".into(),
            content_type: "application/octet-stream".into(),
            created_at: Utc::now(),
        };
        let second = Blob {
            storage_key: "blobs/b".into(),
            ..first.clone()
        };

        assert_eq!(BlobRecords::insert_if_absent(&records, first.clone()).await.unwrap(), first);
        assert_eq!(BlobRecords::insert_if_absent(&records, second).await.unwrap(), first);
        assert_eq!(
            BlobRecords::stats(&records).await.unwrap(),
            BlobStats {
                count: 1,
                total_size: 3
            }
        );
    }

    #[tokio::test]
    async fn tag_history_newest_first() {
        let records = MemoryRecords::new();
        let now = Utc::now();

        for (body, at) in [("one", now), ("two", now + Duration::seconds(1)), ("three", now + Duration::seconds(1))] {
            ManifestRecords::insert_if_absent(&records, manifest("repo", Some("latest"), body, at))
                .await
                .unwrap();
        }
        ManifestRecords::insert_if_absent(&records, manifest("repo", Some("v1"), "four", now))
            .await
            .unwrap();

        let rows = records.by_tag("repo", "latest").await.unwrap();
        let bodies: Vec<&[u8]> = rows.iter().map(|m| m.content.as_ref()).collect();
        assert_eq!(bodies, vec![&b"three"[..], b"two", b"one"]);

        assert_eq!(records.tags("repo").await.unwrap(), vec!["latest", "v1"]);
        assert_eq!(
            ManifestRecords::stats(&records, None).await.unwrap(),
            ManifestStats {
                manifests: 4,
                repositories: 1,
                tags: 2
            }
        );

        assert_eq!(records.remove_by_tag("repo", "latest").await.unwrap(), 3);
        assert_eq!(records.tags("repo").await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn progress_is_compare_and_set() {
        let records = MemoryRecords::new();
        let now = Utc::now();
        SessionRecords::insert(&records, session("a", SessionState::Active, now))
            .await
            .unwrap();

        let updated = records.record_progress("a", 0, 10, now).await.unwrap();
        assert_eq!(updated.map(|s| s.bytes_received), Some(10));

        assert!(records.record_progress("a", 0, 20, now).await.unwrap().is_none());
        assert!(records.record_progress("missing", 0, 1, now).await.unwrap().is_none());

        assert!(
            records
                .transition("a", SessionState::Active, SessionState::Completed, Some(now))
                .await
                .unwrap()
        );
        assert!(records.record_progress("a", 10, 20, now).await.unwrap().is_none());
        assert!(
            !records
                .transition("a", SessionState::Active, SessionState::Completed, Some(now))
                .await
                .unwrap()
        );

        let err = SessionRecords::insert(&records, session("a", SessionState::Active, now))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Conflict(_)));
    }

    #[tokio::test]
    async fn remove_inactive_uses_last_activity() {
        let records = MemoryRecords::new();
        let now = Utc::now();
        let old = now - Duration::hours(1);

        for (id, state, at) in [
            ("stale", SessionState::Active, old),
            ("expired", SessionState::Expired, old),
            ("orphaned", SessionState::Completed, old),
            ("claimed", SessionState::Completed, now),
            ("fresh", SessionState::Active, now),
        ] {
            SessionRecords::insert(&records, session(id, state, at)).await.unwrap();
        }

        let mut removed: Vec<String> = records
            .remove_inactive(now - Duration::minutes(30))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        removed.sort();
        assert_eq!(removed, vec!["expired", "orphaned", "stale"]);

        assert!(SessionRecords::get(&records, "claimed").await.unwrap().is_some());
        assert!(SessionRecords::get(&records, "fresh").await.unwrap().is_some());
        assert_eq!(records.summary().await.unwrap().active, 1);
    }
}
