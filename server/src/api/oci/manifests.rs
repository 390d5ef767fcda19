//! Manifest endpoints.

use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, Method, StatusCode},
    response::Response,
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, TransactionTrait};
use serde::Serialize;
use tracing::instrument;

use super::error::{OciError, OciErrorCode, OciResult};
use super::{creator, parse_reference, repo_context, require_push, resolve_view, RepoPath};
use crate::access::require_pull;
use crate::adapters::container::{self, ManifestReference};
use crate::database::entity::asset::{self, AssetModel, Entity as Asset};
use crate::database::entity::version::{self, Entity as Version};
use crate::database::entity::view::DEFAULT_VIEW;
use crate::database::entity::PackageFormat;
use crate::database::{
    find_asset_by_digest, find_live_version, find_package, find_view, get_blob,
    list_live_versions, list_version_assets,
};
use crate::error::ServerError;
use crate::model::upload::UploadRequest;
use crate::storage::store::blob_path;
use crate::tree;
use crate::{RequestState, State};

#[derive(Debug, Serialize)]
pub(crate) struct TagsList {
    name: String,
    tags: Vec<String>,
}

/// Stores a manifest under a tag or digest.
#[instrument(skip_all, fields(space, repo, reference))]
#[axum_macros::debug_handler]
pub(crate) async fn put_manifest(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo, reference)): RepoPath,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> OciResult<Response> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    require_push(&state, &ctx)?;

    let reference = parse_reference(&reference)?;

    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            OciError::new(OciErrorCode::ManifestInvalid, "missing manifest media type")
        })?
        .to_owned();

    let view = resolve_view(&state, &ctx).await?;
    let store = state.store().await?;
    let database = state.database().await?;

    let mut upload = UploadRequest::new(view);
    let digest = match container::serve(
        &mut upload,
        store,
        &state.manifests,
        &body,
        &media_type,
        ctx.space.as_str(),
        ctx.repo.as_str(),
        &reference,
        &creator(&req_state),
    )
    .await
    {
        Ok(digest) => digest,
        Err(e) => {
            let _ = upload.cancel().await;
            return Err(e.into());
        }
    };

    if let Err(e) = upload.commit(database).await {
        let _ = upload.cancel().await;
        return Err(e.into());
    }

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(
            header::LOCATION,
            format!("/v2/{}/manifests/{}", ctx.full_name(), digest),
        )
        .header("Docker-Content-Digest", digest.to_string())
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap())
}

/// Serves a manifest by tag or digest (or just the headers for
/// HEAD).
#[instrument(skip_all, fields(space, repo, reference))]
pub(crate) async fn get_manifest(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    method: Method,
    Path((space, repo, reference)): RepoPath,
) -> OciResult<Response> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    require_pull(&ctx.permission)?;

    let database = state.database().await?;
    let asset = resolve_manifest_asset(&state, &ctx.space, &ctx.repo, &reference).await?;

    let blob = get_blob(database, asset.blob_id).await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("Docker-Content-Digest", &asset.path)
        .header(header::CONTENT_TYPE, &asset.content_type)
        .header(header::CONTENT_LENGTH, blob.size)
        .header(header::ETAG, format!("\"{}\"", asset.path))
        .header(header::CACHE_CONTROL, "max-age=31536000");

    if method == Method::HEAD {
        return Ok(builder.body(Body::empty()).unwrap());
    }

    let store = state.store().await?;
    let bytes = store.get(&blob_path(&blob.blob_ref)).await?;

    builder = builder.header(header::CONTENT_LENGTH, bytes.len());
    Ok(builder.body(Body::from(bytes)).unwrap())
}

/// Removes a tag (soft-removing its version) or a digest-addressed
/// manifest.
#[instrument(skip_all, fields(space, repo, reference))]
pub(crate) async fn delete_manifest(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo, reference)): RepoPath,
) -> OciResult<StatusCode> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    ctx.permission.require_delete().map_err(ServerError::from)?;

    let database = state.database().await?;
    let now = Utc::now();

    match parse_reference(&reference)? {
        ManifestReference::Tag(tag) => {
            let package = find_package(
                database,
                ctx.space.as_str(),
                "",
                ctx.repo.as_str(),
                PackageFormat::Container,
            )
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| OciError::manifest_unknown(&reference))?;

            let view = find_view(database, ctx.space.as_str(), DEFAULT_VIEW)
                .await?
                .ok_or_else(|| OciError::manifest_unknown(&reference))?;

            let version = find_live_version(database, package.id, view.id, &tag)
                .await?
                .ok_or_else(|| OciError::manifest_unknown(&reference))?;

            let txn = database
                .begin()
                .await
                .map_err(ServerError::database_error)?;

            Version::update(version::ActiveModel {
                id: Set(version.id),
                deleted_at: Set(Some(now)),
                ..Default::default()
            })
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;

            Asset::update_many()
                .col_expr(
                    asset::Column::DeletedAt,
                    sea_orm::sea_query::Expr::value(now),
                )
                .filter(asset::Column::VersionId.eq(version.id))
                .filter(asset::Column::DeletedAt.is_null())
                .exec(&txn)
                .await
                .map_err(ServerError::database_error)?;

            tree::delete_version_node(
                &txn,
                ctx.space.as_str(),
                PackageFormat::Container,
                &package.namespace,
                &package.name,
                &version.version,
            )
            .await?;

            txn.commit().await.map_err(ServerError::database_error)?;
        }
        ManifestReference::Digest(digest) => {
            let digest_str = digest.to_string();

            let asset = find_asset_by_digest(database, &digest_str, PackageFormat::Container)
                .await?
                .ok_or_else(|| OciError::manifest_unknown(&reference))?;

            Asset::update(asset::ActiveModel {
                id: Set(asset.id),
                deleted_at: Set(Some(now)),
                ..Default::default()
            })
            .exec(database)
            .await
            .map_err(ServerError::database_error)?;
        }
    }

    Ok(StatusCode::ACCEPTED)
}

/// Lists a repository's tags.
#[instrument(skip_all, fields(space, repo))]
pub(crate) async fn tags_list(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo)): Path<(String, String)>,
) -> OciResult<Json<TagsList>> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    require_pull(&ctx.permission)?;

    let database = state.database().await?;

    let package = find_package(
        database,
        ctx.space.as_str(),
        "",
        ctx.repo.as_str(),
        PackageFormat::Container,
    )
    .await?
    .filter(|p| !p.is_deleted())
    .ok_or_else(|| {
        OciError::new(OciErrorCode::NameUnknown, "repository name not known to registry")
    })?;

    let view = find_view(database, ctx.space.as_str(), DEFAULT_VIEW)
        .await?
        .ok_or_else(|| {
            OciError::new(OciErrorCode::NameUnknown, "repository name not known to registry")
        })?;

    let mut tags: Vec<String> = list_live_versions(database, package.id, view.id)
        .await?
        .into_iter()
        .map(|v| v.version)
        .collect();
    tags.sort();

    Ok(Json(TagsList {
        name: ctx.full_name(),
        tags,
    }))
}

/// Resolves the asset holding a manifest referenced by tag or
/// digest.
async fn resolve_manifest_asset(
    state: &State,
    space: &depot::name::SpaceName,
    repo: &depot::name::RepoName,
    reference: &str,
) -> OciResult<AssetModel> {
    let database = state.database().await?;

    match parse_reference(reference)? {
        ManifestReference::Digest(digest) => {
            let digest_str = digest.to_string();

            find_asset_by_digest(database, &digest_str, PackageFormat::Container)
                .await?
                .ok_or_else(|| OciError::manifest_unknown(reference))
        }
        ManifestReference::Tag(tag) => {
            let package = find_package(
                database,
                space.as_str(),
                "",
                repo.as_str(),
                PackageFormat::Container,
            )
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| OciError::manifest_unknown(reference))?;

            let view = find_view(database, space.as_str(), DEFAULT_VIEW)
                .await?
                .ok_or_else(|| OciError::manifest_unknown(reference))?;

            let version = find_live_version(database, package.id, view.id, &tag)
                .await?
                .ok_or_else(|| OciError::manifest_unknown(reference))?;

            // The tag's manifest is its version's single exclusive
            // asset
            let assets = list_version_assets(database, version.id).await?;

            assets
                .into_iter()
                .next()
                .ok_or_else(|| OciError::manifest_unknown(reference))
        }
    }
}
