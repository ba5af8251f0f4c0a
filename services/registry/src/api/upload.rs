//! Blob upload routes

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use bytes::Bytes;
use serde::Deserialize;

use super::{CONTENT_DIGEST, Registry, UPLOAD_UUID, header_value};
use crate::blobs::Blob;
use crate::error::{RegistryError, RegistryResult};
use crate::range::{self, RangeSpec};
use crate::uploads::{SessionState, UploadStatus};

/// Router for upload operations
pub(super) fn router(max_chunk_size: usize) -> Router<Registry> {
    Router::new()
        .route("/v2/{name}/blobs/uploads/", post(start_upload))
        .route("/v2/{name}/blobs/uploads", post(start_upload))
        .route(
            "/v2/{name}/blobs/uploads/{id}",
            put(complete_upload)
                .patch(upload_chunk)
                .get(upload_status)
                .delete(cancel_upload),
        )
        .layer(DefaultBodyLimit::max(max_chunk_size))
}

#[derive(Debug, Deserialize)]
struct DigestQuery {
    digest: Option<String>,
}

fn upload_location(name: &str, id: &str) -> String {
    format!("/v2/{name}/blobs/uploads/{id}")
}

/// 202 response describing an upload in progress
fn progress(name: &str, id: &str, received: u64) -> Response {
    (
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, header_value(upload_location(name, id))),
            (header::RANGE, header_value(range::upload_progress(received))),
            (UPLOAD_UUID, header_value(id)),
            (header::CONTENT_LENGTH, HeaderValue::from_static("0")),
        ],
    )
        .into_response()
}

/// 201 response for a finished upload
fn created(name: &str, blob: &Blob) -> Response {
    (
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                header_value(format!("/v2/{name}/blobs/{}", blob.digest)),
            ),
            (CONTENT_DIGEST, header_value(blob.digest.as_str())),
            (header::CONTENT_LENGTH, HeaderValue::from_static("0")),
        ],
    )
        .into_response()
}

/// Look up a session which must be active and belong to `name`
async fn active_session(registry: &Registry, name: &str, id: &str) -> RegistryResult<UploadStatus> {
    crate::validate_repository(name)?;
    let status = registry.uploads().status(id).await?;
    if status.state != SessionState::Active {
        return Err(RegistryError::SessionNotFound(id.to_owned()));
    }
    if status.repository != name {
        return Err(RegistryError::InvalidArgument(format!(
            "upload {id} belongs to another repository"
        )));
    }
    Ok(status)
}

/// Append `body` at the current end of the upload.
async fn append(registry: &Registry, id: &str, received: u64, body: &Bytes) -> RegistryResult<u64> {
    let declared = RangeSpec::new(received, received + body.len() as u64 - 1);
    let mut reader = &body[..];
    let session = registry
        .uploads()
        .append_chunk(id, &mut reader, &declared)
        .await?;
    Ok(session.bytes_received)
}

/// Start a blob upload session
///
/// With a `digest` query parameter the body is the whole blob and the upload
/// finishes in this request.
async fn start_upload(
    State(registry): State<Registry>,
    Path(name): Path<String>,
    Query(query): Query<DigestQuery>,
    body: Bytes,
) -> RegistryResult<Response> {
    let session = registry.uploads().start(&name).await?;

    let Some(digest) = query.digest else {
        return Ok(progress(&name, &session.id, 0));
    };

    let finished = async {
        if !body.is_empty() {
            append(&registry, &session.id, 0, &body).await?;
        }
        registry.uploads().complete(&session.id, &digest).await
    }
    .await;

    match finished {
        Ok(blob) => {
            tracing::info!(repository = %name, digest = %blob.digest, "Monolithic upload finished");
            Ok(created(&name, &blob))
        }
        Err(error) => {
            if let Err(cancel) = registry.uploads().cancel(&session.id).await {
                tracing::warn!(error = %cancel, "Failed to cancel monolithic upload");
            }
            Err(error)
        }
    }
}

/// Upload a chunk
async fn upload_chunk(
    State(registry): State<Registry>,
    Path((name, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let status = active_session(&registry, &name, &id).await?;
    if body.is_empty() {
        return Ok(progress(&name, &id, status.bytes_received));
    }

    let declared = match headers.get(header::CONTENT_RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| RegistryError::InvalidArgument("Content-Range is not text".into()))?;
            range::parse_content_range(value)?
        }
        None => RangeSpec::new(
            status.bytes_received,
            status.bytes_received + body.len() as u64 - 1,
        ),
    };

    let mut reader = &body[..];
    let session = registry
        .uploads()
        .append_chunk(&id, &mut reader, &declared)
        .await?;
    Ok(progress(&name, &id, session.bytes_received))
}

/// Complete a blob upload, optionally with a final chunk
async fn complete_upload(
    State(registry): State<Registry>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<DigestQuery>,
    body: Bytes,
) -> RegistryResult<Response> {
    let digest = query
        .digest
        .ok_or_else(|| RegistryError::InvalidArgument("missing digest".into()))?;
    let status = active_session(&registry, &name, &id).await?;

    if !body.is_empty() {
        append(&registry, &id, status.bytes_received, &body).await?;
    }

    let blob = registry.uploads().complete(&id, &digest).await?;
    tracing::info!(repository = %name, digest = %blob.digest, size = blob.size, "Upload finished");
    Ok(created(&name, &blob))
}

/// Report upload progress
async fn upload_status(
    State(registry): State<Registry>,
    Path((name, id)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let status = active_session(&registry, &name, &id).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [
            (header::LOCATION, header_value(upload_location(&name, &id))),
            (header::RANGE, header_value(range::upload_progress(status.bytes_received))),
            (UPLOAD_UUID, header_value(&id)),
        ],
    )
        .into_response())
}

/// Cancel a blob upload
async fn cancel_upload(
    State(registry): State<Registry>,
    Path((name, id)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    crate::validate_repository(&name)?;
    let status = registry.uploads().status(&id).await?;
    if status.repository != name {
        return Err(RegistryError::InvalidArgument(format!(
            "upload {id} belongs to another repository"
        )));
    }

    if registry.uploads().cancel(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RegistryError::SessionNotFound(id))
    }
}
