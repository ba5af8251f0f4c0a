//! Registry configuration, read from TOML.
//!
//! ```toml
//! listen = "0.0.0.0:5000"
//! bucket = "registry"
//!
//! [storage.local]
//! path = "/var/lib/registry"
//!
//! [upload]
//! session-timeout-secs = 1800
//! cleanup-interval-secs = 300
//! max-chunk-size = 10485760
//!
//! [layout]
//! blob-prefix = "blobs"
//! upload-prefix = "uploads"
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use storage::StorageConfig;

use crate::digest::Digest;

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// Path of the configuration file.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml_edit::de::Error),
}

/// Top-level registry configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    /// Address the HTTP server binds to.
    pub listen: SocketAddr,

    /// Storage bucket holding blobs and upload temporaries.
    pub bucket: String,

    /// Object storage backend.
    pub storage: StorageConfig,

    /// Upload session settings.
    pub upload: UploadConfig,

    /// Object key layout.
    pub layout: StorageLayout,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            bucket: "registry".into(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            layout: StorageLayout::default(),
        }
    }
}

impl RegistryConfig {
    /// Parse configuration from a TOML document.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Ok(toml_edit::de::from_str(document)?)
    }

    /// Read and parse a TOML configuration file.
    pub async fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;
        Self::from_toml(&document)
    }
}

/// Upload session settings.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct UploadConfig {
    /// Inactivity after which a session is expired.
    pub session_timeout_secs: u64,

    /// Interval between expiry sweeps.
    pub cleanup_interval_secs: u64,

    /// Largest request body accepted by upload endpoints.
    pub max_chunk_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 1800,
            cleanup_interval_secs: 300,
            max_chunk_size: 10 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    /// Session inactivity timeout.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Sweep interval.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Where objects live inside the bucket.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageLayout {
    /// Prefix for content-addressed blobs.
    pub blob_prefix: Utf8PathBuf,

    /// Prefix for upload temporaries.
    pub upload_prefix: Utf8PathBuf,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            blob_prefix: "blobs".into(),
            upload_prefix: "uploads".into(),
        }
    }
}

impl StorageLayout {
    /// Key of a blob: `<blob-prefix>/sha256/<first two hex>/<hex>/data`.
    pub fn blob_key(&self, digest: &Digest) -> Utf8PathBuf {
        let hex = digest.hex();
        let mut key = self.blob_prefix.join(digest.algorithm());
        key.push(&hex[..2]);
        key.push(hex);
        key.push("data");
        key
    }

    /// Key of an upload temporary: `<upload-prefix>/<id>.tmp`.
    pub fn upload_key(&self, id: &str) -> Utf8PathBuf {
        self.upload_prefix.join(format!("{id}.tmp"))
    }
}
