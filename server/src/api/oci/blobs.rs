//! Blob endpoints.

use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, Method, StatusCode},
    response::Response,
};
use sea_orm::entity::prelude::*;
use sea_orm::TransactionTrait;
use tokio_util::io::ReaderStream;
use tracing::instrument;

use super::error::{OciError, OciResult};
use super::{repo_context, RepoPath};
use crate::access::require_pull;
use crate::database::entity::asset::Entity as Asset;
use crate::database::entity::blob::Entity as Blob;
use crate::database::entity::view::DEFAULT_VIEW;
use crate::database::entity::PackageFormat;
use crate::database::{find_asset_by_digest, find_view, get_blob as load_blob};
use crate::error::ServerError;
use crate::storage::store::blob_path;
use crate::{RequestState, State};
use depot::digest::Digest;

/// Serves blob bytes (or just the headers for HEAD).
#[instrument(skip_all, fields(space, repo, digest))]
#[axum_macros::debug_handler]
pub(crate) async fn get_blob(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    method: Method,
    Path((space, repo, digest)): RepoPath,
) -> OciResult<Response> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    require_pull(&ctx.permission)?;

    let digest = Digest::from_typed(&digest)
        .map_err(|e| OciError::digest_invalid(e.to_string()))?;
    let digest_str = digest.to_string();

    let database = state.database().await?;

    find_view(database, ctx.space.as_str(), DEFAULT_VIEW)
        .await?
        .ok_or_else(|| OciError::blob_unknown(&digest_str))?;

    let asset = find_asset_by_digest(database, &digest_str, PackageFormat::Container)
        .await?
        .ok_or_else(|| OciError::blob_unknown(&digest_str))?;

    let blob = load_blob(database, asset.blob_id).await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("Docker-Content-Digest", &digest_str)
        .header(header::CONTENT_TYPE, &asset.content_type)
        .header(header::CONTENT_LENGTH, blob.size)
        .header(header::ETAG, format!("\"{}\"", digest_str))
        .header(header::CACHE_CONTROL, "max-age=31536000");

    if method == Method::HEAD {
        return Ok(builder.body(Body::empty()).unwrap());
    }

    let store = state.store().await?;
    let reader = store.open(&blob_path(&blob.blob_ref), 0).await?;

    builder = builder.header(header::ACCEPT_RANGES, "bytes");
    Ok(builder.body(Body::from_stream(ReaderStream::new(reader))).unwrap())
}

/// Removes a blob: asset row, blob row and file, transactionally.
#[instrument(skip_all, fields(space, repo, digest))]
pub(crate) async fn delete_blob(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo, digest)): RepoPath,
) -> OciResult<StatusCode> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    ctx.permission.require_delete().map_err(ServerError::from)?;

    let digest = Digest::from_typed(&digest)
        .map_err(|e| OciError::digest_invalid(e.to_string()))?;
    let digest_str = digest.to_string();

    let database = state.database().await?;

    let asset = find_asset_by_digest(database, &digest_str, PackageFormat::Container)
        .await?
        .ok_or_else(|| OciError::blob_unknown(&digest_str))?;

    let blob = load_blob(database, asset.blob_id).await?;

    let txn = database
        .begin()
        .await
        .map_err(ServerError::database_error)?;

    Asset::delete_by_id(asset.id)
        .exec(&txn)
        .await
        .map_err(ServerError::database_error)?;
    Blob::delete_by_id(blob.id)
        .exec(&txn)
        .await
        .map_err(ServerError::database_error)?;

    let store = state.store().await?;
    match store.delete(&blob_path(&blob.blob_ref)).await {
        Ok(()) | Err(ServerError::PathNotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    txn.commit().await.map_err(ServerError::database_error)?;

    Ok(StatusCode::ACCEPTED)
}
