//! Error types for the registry

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::digest::{Digest, InvalidDigest};
use crate::range::InvalidRange;
use crate::records::RecordError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No usable blob for a digest
    #[error("blob not found: {0}")]
    BlobNotFound(Digest),

    /// No manifest resolves for a repository and reference
    #[error("manifest not found: {repository}:{reference}")]
    ManifestNotFound {
        /// Repository name
        repository: String,
        /// Tag or digest
        reference: String,
    },

    /// Upload session absent, completed or expired
    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    /// A chunk does not start where the upload left off
    #[error("chunk starts at {actual}, upload has received {expected} bytes")]
    RangeMismatch {
        /// Bytes received so far
        expected: u64,
        /// Declared start of the chunk
        actual: u64,
    },

    /// Invalid digest format
    #[error(transparent)]
    InvalidDigest(#[from] InvalidDigest),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: Digest,
        /// Actual digest
        actual: Digest,
    },

    /// Blobs referenced by a manifest do not exist
    #[error("manifest references {} unknown blob(s)", .0.len())]
    DependencyMissing(Vec<Digest>),

    /// Malformed or empty required field
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid repository name
    #[error("invalid repository name: {0:?}")]
    InvalidRepository(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Unsupported manifest media type
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),

    /// Range not satisfiable
    #[error("range not satisfiable for blob of {size} bytes")]
    RangeNotSatisfiable {
        /// Size of the blob
        size: u64,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Record persistence error
    #[error("record error: {0}")]
    Records(#[from] RecordError),

    /// Anything unanticipated
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<InvalidRange> for RegistryError {
    fn from(value: InvalidRange) -> Self {
        RegistryError::InvalidArgument(value.to_string())
    }
}

impl RegistryError {
    pub(crate) fn manifest_not_found(repository: &str, reference: &str) -> Self {
        RegistryError::ManifestNotFound {
            repository: repository.to_owned(),
            reference: reference.to_owned(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::ManifestNotFound { .. }
            | RegistryError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidDigest(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::DependencyMissing(_)
            | RegistryError::InvalidArgument(_)
            | RegistryError::InvalidRepository(_)
            | RegistryError::InvalidManifest(_) => StatusCode::BAD_REQUEST,
            RegistryError::UnsupportedManifestType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RegistryError::RangeMismatch { .. } | RegistryError::RangeNotSatisfiable { .. } => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            RegistryError::Storage(_) | RegistryError::Records(_) | RegistryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) => "BLOB_UNKNOWN",
            RegistryError::ManifestNotFound { .. } => "MANIFEST_UNKNOWN",
            RegistryError::SessionNotFound(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::RangeMismatch { .. } => "BLOB_UPLOAD_INVALID",
            RegistryError::InvalidDigest(_) | RegistryError::DigestMismatch { .. } => {
                "DIGEST_INVALID"
            }
            RegistryError::DependencyMissing(_) => "MANIFEST_BLOB_UNKNOWN",
            RegistryError::InvalidArgument(_) => "INVALID_REQUEST",
            RegistryError::InvalidRepository(_) => "NAME_INVALID",
            RegistryError::InvalidManifest(_) => "MANIFEST_INVALID",
            RegistryError::UnsupportedManifestType(_) => "UNSUPPORTED",
            RegistryError::RangeNotSatisfiable { .. } => "BLOB_UNKNOWN",
            RegistryError::Storage(_) | RegistryError::Records(_) | RegistryError::Internal(_) => {
                "UNKNOWN"
            }
        }
    }

    fn detail(&self) -> Option<serde_json::Value> {
        match self {
            RegistryError::DependencyMissing(missing) => Some(serde_json::json!(missing)),
            RegistryError::RangeMismatch { expected, actual } => Some(serde_json::json!({
                "expected": expected,
                "actual": actual,
            })),
            RegistryError::DigestMismatch { expected, actual } => Some(serde_json::json!({
                "expected": expected,
                "actual": actual,
            })),
            _ => None,
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail {
                code: self.error_code(),
                message: self.to_string(),
                detail: self.detail(),
            }],
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let RegistryError::RangeNotSatisfiable { size } = self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}
