//! Blob download routes

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio_util::io::ReaderStream;

use super::{CONTENT_DIGEST, Registry, header_value};
use crate::blobs::Blob;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::range::{self, RangeStatus};

/// Router for blob operations
pub(super) fn router() -> Router<Registry> {
    Router::new().route(
        "/v2/{name}/blobs/{digest}",
        get(get_blob).head(head_blob).delete(delete_blob),
    )
}

fn blob_headers(blob: &Blob, length: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(&blob.content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CONTENT_DIGEST, header_value(blob.digest.as_str()));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers
}

/// Get a blob, or a byte range of it
async fn get_blob(
    State(registry): State<Registry>,
    Path((name, digest)): Path<(String, String)>,
    request: HeaderMap,
) -> RegistryResult<Response> {
    crate::validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;
    let blob = registry.blobs().get(&digest).await?;

    let requested = match request.get(header::RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| RegistryError::RangeNotSatisfiable { size: blob.size })?;
            let spec = range::parse_byte_range(value, blob.size)
                .map_err(|_| RegistryError::RangeNotSatisfiable { size: blob.size })?;
            Some(spec)
        }
        None => None,
    };

    let (status, start, end) = match range::status_for(requested.as_ref(), blob.size) {
        RangeStatus::FullContent => (StatusCode::OK, 0, blob.size - 1),
        RangeStatus::PartialContent => {
            let spec = requested.as_ref().ok_or_else(|| {
                RegistryError::Internal("partial content without a range".into())
            })?;
            (StatusCode::PARTIAL_CONTENT, spec.start, spec.end)
        }
        RangeStatus::NotSatisfiable => {
            return Err(RegistryError::RangeNotSatisfiable { size: blob.size });
        }
    };

    let reader = registry.blobs().open_range(&digest, start, end).await?;
    let mut headers = blob_headers(&blob, reader.len());
    if status == StatusCode::PARTIAL_CONTENT {
        headers.insert(
            header::CONTENT_RANGE,
            header_value(range::format_content_range(start, end, blob.size)),
        );
    }

    tracing::debug!(%digest, start, end, "Serving blob");
    let body = Body::from_stream(ReaderStream::new(reader));
    Ok((status, headers, body).into_response())
}

/// Check if a blob exists
async fn head_blob(
    State(registry): State<Registry>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    crate::validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;
    let blob = registry.blobs().get(&digest).await?;

    Ok((StatusCode::OK, blob_headers(&blob, blob.size)).into_response())
}

/// Delete a blob
async fn delete_blob(
    State(registry): State<Registry>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    crate::validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;

    if registry.blobs().delete(&digest).await? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(RegistryError::BlobNotFound(digest))
    }
}
