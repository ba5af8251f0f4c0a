//! # OCI Container Registry
//!
//! This crate implements the storage engine of an OCI-compliant container
//! registry, following the
//! [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec),
//! together with the HTTP routes that expose it.
//!
//! ## Features
//!
//! - Content-addressed blob storage with ranged reads
//! - Resumable, chunked blob uploads verified against their digest
//! - Manifests addressed by tag or digest, with dependency checks
//! - Synthesized multi-platform manifest lists
//! - Pluggable object storage via the `storage` crate, and pluggable
//!   record persistence via [`records`]
//! - Periodic reclamation of abandoned uploads
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, registry.router()).await?;
//! # Ok(())
//! # }
//! ```

mod api;
pub mod blobs;
pub mod config;
pub mod digest;
mod error;
pub mod manifests;
pub mod range;
pub mod records;
pub mod sweep;
pub mod uploads;

#[cfg(test)]
mod fixture;

pub use api::{Registry, RegistryBuilder};
pub use error::{RegistryError, RegistryResult};

/// Check a repository name: non-empty, and no path traversal.
pub(crate) fn validate_repository(name: &str) -> RegistryResult<()> {
    if name.trim().is_empty() || name.contains("..") {
        return Err(RegistryError::InvalidRepository(name.to_string()));
    }
    Ok(())
}
