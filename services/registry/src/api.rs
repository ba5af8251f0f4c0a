//! API server builder and router

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use storage::{MemoryStorage, Storage};

use crate::blobs::BlobStore;
use crate::config::{RegistryConfig, StorageLayout, UploadConfig};
use crate::manifests::ManifestStore;
use crate::records::{BlobRecords, ManifestRecords, MemoryRecords, SessionRecords};
use crate::uploads::UploadManager;

mod blob;
mod manifest;
mod upload;

const API_VERSION: HeaderName = HeaderName::from_static("docker-distribution-api-version");
const CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");
const UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Registry builder for configuring and creating the OCI registry service
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    storage: Option<Storage>,
    bucket: Option<String>,
    blob_records: Option<Arc<dyn BlobRecords>>,
    manifest_records: Option<Arc<dyn ManifestRecords>>,
    session_records: Option<Arc<dyn SessionRecords>>,
    upload: UploadConfig,
    layout: StorageLayout,
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration, leaving the storage backend to be set.
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new()
            .bucket(config.bucket.clone())
            .upload(config.upload)
            .layout(config.layout.clone())
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the record backend used for blobs, manifests and upload sessions
    pub fn records<R>(mut self, records: Arc<R>) -> Self
    where
        R: BlobRecords + ManifestRecords + SessionRecords + 'static,
    {
        self.blob_records = Some(records.clone());
        self.manifest_records = Some(records.clone());
        self.session_records = Some(records);
        self
    }

    /// Set upload session settings
    pub fn upload(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    /// Set the object key layout
    pub fn layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Build the registry service
    ///
    /// Without a storage backend or record backend, in-memory ones are used.
    pub fn build(self) -> Registry {
        let bucket = self.bucket.unwrap_or_else(|| "registry".to_string());
        let storage = self
            .storage
            .unwrap_or_else(|| MemoryStorage::with_buckets(&[bucket.as_str()]).into());

        let (blob_records, manifest_records, session_records) =
            match (self.blob_records, self.manifest_records, self.session_records) {
                (Some(blobs), Some(manifests), Some(sessions)) => (blobs, manifests, sessions),
                _ => {
                    let records = Arc::new(MemoryRecords::new());
                    (
                        records.clone() as Arc<dyn BlobRecords>,
                        records.clone() as Arc<dyn ManifestRecords>,
                        records as Arc<dyn SessionRecords>,
                    )
                }
            };

        let blobs = BlobStore::new(storage.bucket(bucket), blob_records, self.layout);
        let uploads = UploadManager::new(blobs.clone(), session_records, self.upload);
        let manifests = ManifestStore::new(blobs.clone(), manifest_records);

        tracing::debug!(driver = storage.name(), "Registry built");
        Registry {
            blobs,
            uploads,
            manifests,
        }
    }
}

/// The registry's stores, shared by every request handler
#[derive(Debug, Clone)]
pub struct Registry {
    blobs: BlobStore,
    uploads: UploadManager,
    manifests: ManifestStore,
}

impl Registry {
    /// Blob store
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Upload session manager
    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    /// Manifest store
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// The HTTP routes of the registry
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn router(&self) -> Router {
        let max_chunk = self.uploads.config().max_chunk_size;
        Router::new()
            .route("/v2/", get(api_version_check))
            .route("/v2/_ping", get(ping))
            .merge(blob::router())
            .merge(upload::router(max_chunk))
            .merge(manifest::router())
            .with_state(self.clone())
    }

    /// Consume the registry into its router
    pub fn into_router(self) -> Router {
        self.router()
    }
}

fn header_value(value: impl AsRef<str>) -> HeaderValue {
    HeaderValue::from_str(value.as_ref()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> Response {
    (
        StatusCode::OK,
        [(API_VERSION, HeaderValue::from_static("registry/2.0"))],
        axum::Json(json!({})),
    )
        .into_response()
}

async fn ping() -> Response {
    (
        StatusCode::OK,
        [(API_VERSION, HeaderValue::from_static("registry/2.0"))],
    )
        .into_response()
}
