//! Image manifests, addressed by digest or by tag.
//!
//! A manifest is only accepted when every blob it references is already
//! stored. Writing the same document twice is a no-op, and a tag resolves
//! to the most recently written manifest carrying it.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blobs::BlobStore;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::records::{ManifestRecords, ManifestStats};

/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker manifest list, schema 2.
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI image manifest.
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index.
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Config blobs larger than this are not read for platform details.
const PLATFORM_CONFIG_LIMIT: u64 = 64 * 1024;

/// Whether `media_type` is one of the manifest types the registry understands.
pub fn is_supported_manifest_type(media_type: &str) -> bool {
    matches!(
        media_type,
        DOCKER_MANIFEST_V2 | DOCKER_MANIFEST_LIST_V2 | OCI_MANIFEST_V1 | OCI_INDEX_V1
    )
}

/// Whether `media_type` names a multi-platform list.
pub fn is_manifest_list_type(media_type: &str) -> bool {
    matches!(media_type, DOCKER_MANIFEST_LIST_V2 | OCI_INDEX_V1)
}

/// Whether a reference is a digest rather than a tag.
pub fn is_digest_reference(reference: &str) -> bool {
    Digest::validate(reference)
}

/// A stored manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Digest of the raw document.
    pub digest: Digest,
    /// Repository the manifest belongs to.
    pub repository: String,
    /// Tag the manifest was written under, if it was written by tag.
    pub tag: Option<String>,
    /// The raw document.
    pub content: Bytes,
    /// Media type given when the manifest was written.
    pub media_type: String,
    /// When the manifest was written.
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    /// Size of the raw document in bytes.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// The parts of a manifest document that reference blobs.
#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl Document {
    fn parse(content: &[u8]) -> RegistryResult<Self> {
        serde_json::from_slice(content)
            .map_err(|err| RegistryError::InvalidManifest(format!("not a manifest document: {err}")))
    }

    /// Digests of referenced blobs which are not carried inline, in document order.
    fn dependencies(&self) -> RegistryResult<Vec<Digest>> {
        let mut digests: Vec<Digest> = Vec::new();
        let descriptors = self.config.iter().chain(self.layers.iter());
        for descriptor in descriptors.filter(|d| d.data.is_none()) {
            let Some(digest) = descriptor.digest.as_deref() else {
                continue;
            };
            let digest = Digest::parse(digest).map_err(|err| {
                RegistryError::InvalidManifest(format!("bad blob reference: {err}"))
            })?;
            if !digests.contains(&digest) {
                digests.push(digest);
            }
        }
        Ok(digests)
    }
}

/// Platform an image runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`.
    pub architecture: String,
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU variant, e.g. `v8`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            architecture: "amd64".into(),
            os: "linux".into(),
            variant: None,
        }
    }
}

/// One entry of a manifest list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestListEntry {
    /// Media type of the referenced manifest.
    pub media_type: String,
    /// Size of the referenced manifest.
    pub size: u64,
    /// Digest of the referenced manifest.
    pub digest: Digest,
    /// Platform the referenced image runs on.
    pub platform: Platform,
}

/// A multi-platform manifest list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    /// Always 2.
    pub schema_version: u32,
    /// Always the Docker manifest list type.
    pub media_type: &'static str,
    /// Entries, newest manifest first.
    pub manifests: Vec<ManifestListEntry>,
}

impl ManifestList {
    /// Serialize the list as a JSON document.
    pub fn to_json(&self) -> RegistryResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|err| RegistryError::Internal(format!("serializing manifest list: {err}")))
    }
}

/// Manifest repository, checking references against a [`BlobStore`].
#[derive(Debug, Clone)]
pub struct ManifestStore {
    blobs: BlobStore,
    records: Arc<dyn ManifestRecords>,
}

impl ManifestStore {
    /// Create a manifest store.
    pub fn new(blobs: BlobStore, records: Arc<dyn ManifestRecords>) -> Self {
        Self { blobs, records }
    }

    /// Find the manifest a reference points to: by digest when the reference
    /// is one, otherwise the newest manifest with that tag.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, repository: &str, reference: &str) -> RegistryResult<Manifest> {
        crate::validate_repository(repository)?;
        require("reference", reference)?;

        let found = if is_digest_reference(reference) {
            let digest = Digest::parse(reference)?;
            self.records.by_digest(repository, &digest).await?
        } else {
            self.records
                .by_tag(repository, reference)
                .await?
                .into_iter()
                .next()
        };

        found.ok_or_else(|| RegistryError::manifest_not_found(repository, reference))
    }

    /// Whether a reference resolves.
    pub async fn exists(&self, repository: &str, reference: &str) -> RegistryResult<bool> {
        match self.resolve(repository, reference).await {
            Ok(_) => Ok(true),
            Err(RegistryError::ManifestNotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Store a manifest under a tag or digest reference.
    ///
    /// Fails with [`RegistryError::DependencyMissing`] listing every
    /// referenced blob that is not stored. If the same document is already
    /// stored in the repository, the existing record is returned unchanged.
    #[tracing::instrument(skip(self, content), fields(size = content.len()))]
    pub async fn put(
        &self,
        repository: &str,
        reference: &str,
        content: Bytes,
        media_type: &str,
    ) -> RegistryResult<Manifest> {
        crate::validate_repository(repository)?;
        require("reference", reference)?;
        require("media type", media_type)?;
        if content.is_empty() {
            return Err(RegistryError::InvalidArgument("manifest content is empty".into()));
        }
        if !is_supported_manifest_type(media_type) {
            tracing::warn!(%media_type, "Storing manifest with unsupported media type");
        }

        let document = Document::parse(&content)?;
        let mut missing = Vec::new();
        for digest in document.dependencies()? {
            if !self.blobs.exists(&digest).await? {
                missing.push(digest);
            }
        }
        if !missing.is_empty() {
            tracing::debug!(count = missing.len(), "Manifest references unknown blobs");
            return Err(RegistryError::DependencyMissing(missing));
        }

        let digest = Digest::compute(&content);
        if let Some(existing) = self.records.by_digest(repository, &digest).await? {
            tracing::debug!(%digest, "Manifest already stored");
            return Ok(existing);
        }

        let tag = (!is_digest_reference(reference)).then(|| reference.to_owned());
        let manifest = self
            .records
            .insert_if_absent(Manifest {
                digest,
                repository: repository.to_owned(),
                tag,
                content,
                media_type: media_type.to_owned(),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(digest = %manifest.digest, tag = ?manifest.tag, "Manifest created");
        Ok(manifest)
    }

    /// Delete by digest, or every manifest carrying a tag.
    ///
    /// Returns false if the reference does not resolve.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, repository: &str, reference: &str) -> RegistryResult<bool> {
        let manifest = match self.resolve(repository, reference).await {
            Ok(manifest) => manifest,
            Err(RegistryError::ManifestNotFound { .. }) => {
                tracing::debug!("Nothing to delete");
                return Ok(false);
            }
            Err(error) => return Err(error),
        };

        let removed = if is_digest_reference(reference) {
            self.records
                .remove_by_digest(repository, &manifest.digest)
                .await?
        } else {
            self.records.remove_by_tag(repository, reference).await?
        };

        tracing::info!(digest = %manifest.digest, removed, "Manifest deleted");
        Ok(removed > 0)
    }

    /// Tags in a repository, sorted.
    #[tracing::instrument(skip(self))]
    pub async fn tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        crate::validate_repository(repository)?;
        Ok(self.records.tags(repository).await?)
    }

    /// Combine every manifest written under a tag into one manifest list.
    #[tracing::instrument(skip(self))]
    pub async fn build_manifest_list(&self, repository: &str, tag: &str) -> RegistryResult<ManifestList> {
        crate::validate_repository(repository)?;
        require("tag", tag)?;

        let rows = self.records.by_tag(repository, tag).await?;
        if rows.is_empty() {
            return Err(RegistryError::manifest_not_found(repository, tag));
        }

        let mut manifests = Vec::with_capacity(rows.len());
        for row in rows {
            let platform = self.platform(&row).await;
            manifests.push(ManifestListEntry {
                size: row.size(),
                media_type: row.media_type,
                digest: row.digest,
                platform,
            });
        }

        Ok(ManifestList {
            schema_version: 2,
            media_type: DOCKER_MANIFEST_LIST_V2,
            manifests,
        })
    }

    /// Platform of the image a manifest describes, read from its config
    /// blob when possible.
    async fn platform(&self, manifest: &Manifest) -> Platform {
        let Some(config) = Document::parse(&manifest.content)
            .ok()
            .and_then(|document| document.config)
            .and_then(|config| config.digest)
            .and_then(|digest| Digest::parse(&digest).ok())
        else {
            return Platform::default();
        };

        match self.blobs.get(&config).await {
            Ok(blob) if blob.size <= PLATFORM_CONFIG_LIMIT => {}
            _ => return Platform::default(),
        }

        match self.blobs.read(&config).await {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|err| {
                tracing::debug!(%config, %err, "Config blob has no platform");
                Platform::default()
            }),
            Err(error) => {
                tracing::debug!(%config, %error, "Config blob unreadable");
                Platform::default()
            }
        }
    }

    /// Counts for one repository, or for the whole registry.
    pub async fn stats(&self, repository: Option<&str>) -> RegistryResult<ManifestStats> {
        Ok(self.records.stats(repository).await?)
    }
}

fn require(field: &str, value: &str) -> RegistryResult<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidArgument(format!("{field} is empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fixture::Fixture;

    fn document(config: &Digest, layers: &[&Digest]) -> Bytes {
        let layers: Vec<_> = layers
            .iter()
            .map(|digest| {
                json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": digest,
                    "size": 1,
                })
            })
            .collect();
        let body = json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST_V1,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config,
                "size": 1,
            },
            "layers": layers,
        });
        Bytes::from(serde_json::to_vec(&body).unwrap())
    }

    #[tokio::test]
    async fn missing_dependencies_are_all_reported() {
        let fixture = Fixture::new();
        let d1 = fixture.blob(b"config").await;
        let d2 = Digest::compute(b"layer one");
        let d3 = Digest::compute(b"layer two");
        let content = document(&d1, &[&d2, &d3, &d2]);

        let err = fixture
            .manifests
            .put("repo", "latest", content.clone(), OCI_MANIFEST_V1)
            .await
            .unwrap_err();
        match err {
            RegistryError::DependencyMissing(missing) => assert_eq!(missing, vec![d2.clone(), d3.clone()]),
            other => panic!("unexpected error: {other}"),
        }

        fixture.blob(b"layer one").await;
        fixture.blob(b"layer two").await;
        let manifest = fixture
            .manifests
            .put("repo", "latest", content.clone(), OCI_MANIFEST_V1)
            .await
            .unwrap();
        assert_eq!(manifest.digest, Digest::compute(&content));
        assert_eq!(manifest.tag.as_deref(), Some("latest"));
    }

    #[tokio::test]
    async fn inline_config_is_not_a_dependency() {
        let fixture = Fixture::new();
        let body = json!({
            "schemaVersion": 2,
            "config": {
                "digest": Digest::compute(b"{}"),
                "data": "e30=",
            },
            "layers": [],
        });
        let content = Bytes::from(serde_json::to_vec(&body).unwrap());

        fixture
            .manifests
            .put("repo", "inline", content, OCI_MANIFEST_V1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_documents_are_rejected() {
        let fixture = Fixture::new();

        let err = fixture
            .manifests
            .put("repo", "latest", Bytes::from_static(b"not json"), OCI_MANIFEST_V1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidManifest(_)));

        let content = Bytes::from_static(br#"{"config": {"digest": "sha256:1234"}}"#);
        let err = fixture
            .manifests
            .put("repo", "latest", content, OCI_MANIFEST_V1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidManifest(_)));

        let err = fixture
            .manifests
            .put("repo", "latest", Bytes::new(), OCI_MANIFEST_V1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));

        let err = fixture
            .manifests
            .put("../etc", "latest", Bytes::from_static(b"{}"), OCI_MANIFEST_V1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRepository(_)));
    }

    #[tokio::test]
    async fn tags_and_digests_resolve() {
        let fixture = Fixture::new();
        let config = fixture.blob(b"config").await;
        let layer_a = fixture.blob(b"layer a").await;
        let layer_b = fixture.blob(b"layer b").await;

        let first = fixture
            .manifests
            .put("repo", "latest", document(&config, &[&layer_a]), OCI_MANIFEST_V1)
            .await
            .unwrap();
        let by_tag = fixture.manifests.resolve("repo", "latest").await.unwrap();
        let by_digest = fixture
            .manifests
            .resolve("repo", first.digest.as_str())
            .await
            .unwrap();
        assert_eq!(by_tag.digest, first.digest);
        assert_eq!(by_digest.digest, first.digest);

        let second = fixture
            .manifests
            .put("repo", "latest", document(&config, &[&layer_b]), OCI_MANIFEST_V1)
            .await
            .unwrap();
        assert_ne!(first.digest, second.digest);
        assert_eq!(
            fixture.manifests.resolve("repo", "latest").await.unwrap().digest,
            second.digest
        );
        assert_eq!(
            fixture
                .manifests
                .resolve("repo", first.digest.as_str())
                .await
                .unwrap()
                .digest,
            first.digest
        );

        let err = fixture.manifests.resolve("other", "latest").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestNotFound { .. }));
        assert!(!fixture.manifests.exists("repo", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn put_is_idempotent_per_repository() {
        let fixture = Fixture::new();
        let config = fixture.blob(b"config").await;
        let content = document(&config, &[]);

        let first = fixture
            .manifests
            .put("repo", "v1", content.clone(), OCI_MANIFEST_V1)
            .await
            .unwrap();
        let again = fixture
            .manifests
            .put("repo", "v2", content.clone(), DOCKER_MANIFEST_V2)
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(fixture.manifests.tags("repo").await.unwrap(), vec!["v1"]);

        let by_digest = fixture
            .manifests
            .put("mirror", first.digest.as_str(), content, OCI_MANIFEST_V1)
            .await
            .unwrap();
        assert_eq!(by_digest.tag, None);
        assert_eq!(fixture.manifests.stats(None).await.unwrap().manifests, 2);
        assert_eq!(fixture.manifests.stats(Some("repo")).await.unwrap().tags, 1);
    }

    #[tokio::test]
    async fn delete_by_tag_and_digest() {
        let fixture = Fixture::new();
        let config = fixture.blob(b"config").await;
        let layer = fixture.blob(b"layer").await;

        let old = fixture
            .manifests
            .put("repo", "latest", document(&config, &[]), OCI_MANIFEST_V1)
            .await
            .unwrap();
        fixture
            .manifests
            .put("repo", "latest", document(&config, &[&layer]), OCI_MANIFEST_V1)
            .await
            .unwrap();
        let pinned = fixture
            .manifests
            .put("repo", "stable", document(&layer, &[]), OCI_MANIFEST_V1)
            .await
            .unwrap();

        assert!(fixture.manifests.delete("repo", "latest").await.unwrap());
        assert!(!fixture.manifests.exists("repo", "latest").await.unwrap());
        assert!(!fixture.manifests.exists("repo", old.digest.as_str()).await.unwrap());
        assert!(!fixture.manifests.delete("repo", "latest").await.unwrap());

        assert!(fixture.manifests.delete("repo", pinned.digest.as_str()).await.unwrap());
        assert!(fixture.manifests.tags("repo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manifest_list_reads_platforms() {
        let fixture = Fixture::new();
        let arm = fixture
            .blob(br#"{"architecture": "arm64", "os": "linux", "variant": "v8"}"#)
            .await;
        let opaque = fixture.blob(b"not a config").await;

        let older = fixture
            .manifests
            .put("repo", "multi", document(&opaque, &[]), DOCKER_MANIFEST_V2)
            .await
            .unwrap();
        let newer = fixture
            .manifests
            .put("repo", "multi", document(&arm, &[]), OCI_MANIFEST_V1)
            .await
            .unwrap();

        let list = fixture.manifests.build_manifest_list("repo", "multi").await.unwrap();
        assert_eq!(list.schema_version, 2);
        assert_eq!(list.media_type, DOCKER_MANIFEST_LIST_V2);
        assert_eq!(list.manifests.len(), 2);

        assert_eq!(list.manifests[0].digest, newer.digest);
        assert_eq!(list.manifests[0].media_type, OCI_MANIFEST_V1);
        assert_eq!(list.manifests[0].size, newer.size());
        assert_eq!(list.manifests[0].platform.architecture, "arm64");
        assert_eq!(list.manifests[0].platform.variant.as_deref(), Some("v8"));

        assert_eq!(list.manifests[1].digest, older.digest);
        assert_eq!(list.manifests[1].platform, Platform::default());

        let json: serde_json::Value = serde_json::from_slice(&list.to_json().unwrap()).unwrap();
        assert_eq!(json["mediaType"], DOCKER_MANIFEST_LIST_V2);
        assert_eq!(json["manifests"][1]["platform"]["os"], "linux");

        let err = fixture.manifests.build_manifest_list("repo", "none").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestNotFound { .. }));
    }

    #[test]
    fn reference_kinds() {
        assert!(is_digest_reference(Digest::compute(b"x").as_str()));
        assert!(!is_digest_reference("latest"));
        assert!(!is_digest_reference("sha256:short"));
        assert!(is_supported_manifest_type(OCI_INDEX_V1));
        assert!(!is_supported_manifest_type("text/plain"));
        assert!(is_manifest_list_type(DOCKER_MANIFEST_LIST_V2));
    }
}
