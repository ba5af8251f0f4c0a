//! Manifest and tag routes

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use bytes::Bytes;
use serde_json::json;

use super::{CONTENT_DIGEST, Registry, header_value};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifests::{self, DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2, OCI_INDEX_V1};

/// Router for manifest operations
pub(super) fn router() -> Router<Registry> {
    Router::new()
        .route(
            "/v2/{name}/manifests/{reference}",
            get(get_manifest)
                .head(head_manifest)
                .put(put_manifest)
                .delete(delete_manifest),
        )
        .route("/v2/{name}/tags/list", get(list_tags))
}

/// Whether the client asked for a multi-platform list.
fn accepts_list(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|value| value.split(';').next().unwrap_or_default().trim())
        .any(|value| {
            value == DOCKER_MANIFEST_LIST_V2
                || value == OCI_INDEX_V1
                || value == "application/vnd.docker.distribution.manifest.list"
        })
}

fn document(status: StatusCode, media_type: &str, digest: &Digest, content: Bytes) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, header_value(media_type)),
            (header::CONTENT_LENGTH, HeaderValue::from(content.len())),
            (CONTENT_DIGEST, header_value(digest.as_str())),
        ],
        content,
    )
        .into_response()
}

/// Get a manifest by tag or digest
///
/// A tag requested with a manifest list `Accept` type is answered with a list
/// of every manifest written under the tag.
async fn get_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let manifest = registry.manifests().resolve(&name, &reference).await?;

    if manifests::is_digest_reference(&reference)
        || !accepts_list(&headers)
        || manifests::is_manifest_list_type(&manifest.media_type)
    {
        return Ok(document(
            StatusCode::OK,
            &manifest.media_type,
            &manifest.digest,
            manifest.content,
        ));
    }

    let list = registry
        .manifests()
        .build_manifest_list(&name, &reference)
        .await?;
    let content = list.to_json()?;
    let digest = Digest::compute(&content);
    tracing::debug!(tag = %reference, entries = list.manifests.len(), "Serving manifest list");
    Ok(document(StatusCode::OK, list.media_type, &digest, content))
}

/// Check if a manifest exists
async fn head_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let manifest = registry.manifests().resolve(&name, &reference).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, header_value(&manifest.media_type)),
            (header::CONTENT_LENGTH, HeaderValue::from(manifest.size())),
            (CONTENT_DIGEST, header_value(manifest.digest.as_str())),
        ],
    )
        .into_response())
}

/// Put a manifest
async fn put_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let media_type = match headers.get(header::CONTENT_TYPE) {
        Some(value) => value
            .to_str()
            .map_err(|_| RegistryError::UnsupportedManifestType("non-text content type".into()))?
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_owned(),
        None => DOCKER_MANIFEST_V2.to_owned(),
    };
    if !manifests::is_supported_manifest_type(&media_type) && !media_type.contains("manifest") {
        return Err(RegistryError::UnsupportedManifestType(media_type));
    }

    let manifest = registry
        .manifests()
        .put(&name, &reference, body, &media_type)
        .await?;

    let location = format!("/v2/{name}/manifests/{}", manifest.digest);
    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, header_value(location)),
            (CONTENT_DIGEST, header_value(manifest.digest.as_str())),
            (header::CONTENT_LENGTH, HeaderValue::from_static("0")),
        ],
    )
        .into_response())
}

/// Delete a manifest
async fn delete_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    if registry.manifests().delete(&name, &reference).await? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(RegistryError::manifest_not_found(&name, &reference))
    }
}

/// List tags in a repository
async fn list_tags(
    State(registry): State<Registry>,
    Path(name): Path<String>,
) -> RegistryResult<Json<serde_json::Value>> {
    let tags = registry.manifests().tags(&name).await?;
    Ok(Json(json!({
        "name": name,
        "tags": tags,
    })))
}
