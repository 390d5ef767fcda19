//! Asset listing.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::access::require_pull;
use crate::database::entity::asset::AssetKind;
use crate::database::entity::view::DEFAULT_VIEW;
use crate::database::entity::PackageFormat;
use crate::database::{find_live_version, find_package, find_view, list_version_assets};
use crate::error::{ServerError, ServerResult};
use crate::{RequestState, State};
use depot::name::SpaceName;

#[derive(Debug, Deserialize)]
pub(crate) struct ListAssetsQuery {
    format: PackageFormat,
    name: String,

    #[serde(default)]
    namespace: String,

    version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssetEntry {
    id: i64,
    path: String,
    kind: &'static str,
    content_type: String,
    size: i64,
    sha256: String,
}

/// Lists the assets of a version.
#[instrument(skip_all, fields(space))]
pub(crate) async fn list_assets(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path(space): Path<String>,
    Query(query): Query<ListAssetsQuery>,
) -> ServerResult<Json<Vec<AssetEntry>>> {
    let space = SpaceName::new(space)?;
    require_pull(&req_state.auth.get_permission_for_space(&space))?;

    let database = state.database().await?;

    let package = find_package(
        database,
        space.as_str(),
        &query.namespace,
        &query.name,
        query.format,
    )
    .await?
    .filter(|p| !p.is_deleted())
    .ok_or(ServerError::NoSuchPackage)?;

    let view = find_view(database, space.as_str(), DEFAULT_VIEW)
        .await?
        .ok_or(ServerError::NoSuchView)?;

    let version = find_live_version(database, package.id, view.id, &query.version)
        .await?
        .ok_or(ServerError::NoSuchVersion)?;

    let assets = list_version_assets(database, version.id).await?;

    let mut entries = Vec::with_capacity(assets.len());
    for asset in assets {
        let blob = crate::database::get_blob(database, asset.blob_id).await?;

        entries.push(AssetEntry {
            id: asset.id,
            kind: match asset.kind {
                AssetKind::Main => "main",
                AssetKind::Sub => "sub",
            },
            content_type: asset.content_type.clone(),
            size: blob.size,
            sha256: asset.sha256().to_owned(),
            path: asset.path,
        });
    }

    Ok(Json(entries))
}
