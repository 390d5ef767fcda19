//! Raw artifact API.
//!
//! Uploads with user-supplied `{name, group?, version}` coordinates
//! and path-addressed downloads, under `/artifact/<space>/raw`.

use axum::{
    body::Body,
    extract::{Extension, Multipart, Path},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value as JsonValue};
use tokio_util::io::ReaderStream;
use tracing::instrument;

use crate::access::require_pull;
use crate::adapters::raw;
use crate::database::entity::view::DEFAULT_VIEW;
use crate::database::entity::PackageFormat;
use crate::database::{
    find_asset_by_version_path, find_live_version, find_or_create_default_view, find_package,
    find_view, get_blob,
};
use crate::error::{ServerError, ServerResult};
use crate::model::upload::UploadRequest;
use crate::storage::store::blob_path;
use crate::{RequestState, State};
use depot::name::SpaceName;

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/artifact/:space/raw", post(upload_raw))
        .route("/artifact/:space/raw/*path", get(download_raw))
}

/// Uploads a raw file.
#[instrument(skip_all, fields(space))]
async fn upload_raw(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path(space): Path<String>,
    mut multipart: Multipart,
) -> ServerResult<(StatusCode, Json<JsonValue>)> {
    let space = SpaceName::new(space)?;
    req_state
        .auth
        .get_permission_for_space(&space)
        .require_push()?;

    let database = state.database().await?;
    let store = state.store().await?;

    let view = find_or_create_default_view(
        database,
        space.as_str(),
        state.config.storage.storage_id(),
    )
    .await?;

    let creator = req_state.auth.username().unwrap_or("anonymous").to_string();

    let mut upload = UploadRequest::new(view);

    let result = async {
        raw::serve(&mut upload, store, &mut multipart, space.as_str(), &creator).await?;
        raw::is_valid(upload.descriptor()?)?;
        upload.commit(database).await
    }
    .await;

    match result {
        Ok(outcome) => {
            let descriptor = upload.descriptor()?;

            // Where the artifact can now be fetched from
            let mut segments: Vec<&str> = descriptor
                .namespace
                .split('.')
                .filter(|s| !s.is_empty())
                .collect();
            segments.push(&descriptor.name);
            segments.push(&descriptor.version);
            segments.push(&descriptor.main_asset.path);

            let download_url = format!(
                "{}artifact/{}/raw/{}",
                req_state.api_endpoint()?,
                space.as_str(),
                segments.join("/")
            );

            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "saved": true,
                    "changed": outcome.changed,
                    "downloadUrl": download_url,
                })),
            ))
        }
        Err(e) => {
            let _ = upload.cancel().await;
            Err(e)
        }
    }
}

/// Streams a raw file addressed as
/// `<group…>/<name>/<version>/<filename>`.
#[instrument(skip_all, fields(space, path))]
async fn download_raw(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, path)): Path<(String, String)>,
) -> ServerResult<Response> {
    let space = SpaceName::new(space)?;
    require_pull(&req_state.auth.get_permission_for_space(&space))?;

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 3 {
        return Err(ServerError::NotFound);
    }

    let file_name = segments[segments.len() - 1];
    let version = segments[segments.len() - 2];
    let name = segments[segments.len() - 3];
    let group = segments[..segments.len() - 3].join(".");

    let database = state.database().await?;

    let package = find_package(database, space.as_str(), &group, name, PackageFormat::Raw)
        .await?
        .filter(|p| !p.is_deleted())
        .ok_or(ServerError::NoSuchPackage)?;

    let view = find_view(database, space.as_str(), DEFAULT_VIEW)
        .await?
        .ok_or(ServerError::NoSuchView)?;

    let version = find_live_version(database, package.id, view.id, version)
        .await?
        .ok_or(ServerError::NoSuchVersion)?;

    let asset = find_asset_by_version_path(database, version.id, file_name)
        .await?
        .ok_or(ServerError::NoSuchAsset)?;

    let blob = get_blob(database, asset.blob_id).await?;

    let store = state.store().await?;
    let reader = store.open(&blob_path(&blob.blob_ref), 0).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &asset.content_type)
        .header(header::CONTENT_LENGTH, blob.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", file_name),
        )
        .body(Body::from_stream(ReaderStream::new(reader)))
        .unwrap())
}
