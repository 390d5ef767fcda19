//! Helm repository API.
//!
//! Chart pushes, the generated `index.yaml`, and chart downloads,
//! under `/artifact/<space>/helm`.

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
use crate::adapters::{helm, helm_index};
use crate::database::entity::view::DEFAULT_VIEW;
use crate::database::entity::PackageFormat;
use crate::database::{find_asset_in_view, find_asset_index, find_or_create_default_view, find_view, get_blob};
use crate::error::{ServerError, ServerResult};
use crate::model::upload::UploadRequest;
use crate::storage::store::blob_path;
use crate::{RequestState, State};
use depot::mime;
use depot::name::SpaceName;

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/artifact/:space/helm/api/charts", post(push_chart))
        .route("/artifact/:space/helm/index.yaml", get(get_index))
        .route("/artifact/:space/helm/:file", get(download_chart))
}

/// Uploads a chart tarball.
#[instrument(skip_all, fields(space))]
async fn push_chart(
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

    let mut upload = UploadRequest::new(view.clone());

    let result = async {
        helm::serve(&mut upload, store, &mut multipart, space.as_str(), &creator).await?;
        helm::is_valid(upload.descriptor()?)?;
        upload.commit(database).await
    }
    .await;

    match result {
        Ok(_) => {
            helm_index::regenerate(database, store, &view, space.as_str(), &creator).await?;

            Ok((StatusCode::CREATED, Json(json!({ "saved": true }))))
        }
        Err(e) => {
            let _ = upload.cancel().await;
            Err(e)
        }
    }
}

/// Serves the repository index, or a default empty one when no
/// chart has been pushed yet.
#[instrument(skip_all, fields(space))]
async fn get_index(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path(space): Path<String>,
) -> ServerResult<Response> {
    let space = SpaceName::new(space)?;
    require_pull(&req_state.auth.get_permission_for_space(&space))?;

    let database = state.database().await?;

    let view = find_view(database, space.as_str(), DEFAULT_VIEW).await?;

    let asset = match &view {
        Some(view) => {
            find_asset_index(database, view.id, helm_index::INDEX_PATH, PackageFormat::Helm).await?
        }
        None => None,
    };

    let Some(asset) = asset else {
        let index = helm_index::HelmIndex::new(space.as_str());

        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime::YAML)
            .body(Body::from(index.to_yaml()?))
            .unwrap());
    };

    let blob = get_blob(database, asset.blob_id).await?;

    let store = state.store().await?;
    let reader = store.open(&blob_path(&blob.blob_ref), 0).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &asset.content_type)
        .header(header::CONTENT_LENGTH, blob.size)
        .body(Body::from_stream(ReaderStream::new(reader)))
        .unwrap())
}

/// Streams a chart tarball.
#[instrument(skip_all, fields(space, file))]
async fn download_chart(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, file)): Path<(String, String)>,
) -> ServerResult<Response> {
    let space = SpaceName::new(space)?;
    require_pull(&req_state.auth.get_permission_for_space(&space))?;

    if !file.ends_with(".tgz") {
        return Err(ServerError::NotFound);
    }

    let database = state.database().await?;

    let view = find_view(database, space.as_str(), DEFAULT_VIEW)
        .await?
        .ok_or(ServerError::NoSuchAsset)?;

    let asset = find_asset_in_view(
        database,
        view.id,
        &format!("charts/{}", file),
        PackageFormat::Helm,
    )
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
            format!("attachment; filename={}", file),
        )
        .body(Body::from_stream(ReaderStream::new(reader)))
        .unwrap())
}
