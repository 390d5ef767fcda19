//! Subtree soft-removal.

use std::collections::HashSet;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, TransactionTrait};
use serde::Deserialize;
use tracing::instrument;

use crate::database::entity::asset::{self, Entity as Asset};
use crate::database::entity::tree_node::TreeNodeType;
use crate::database::entity::version::{self, Entity as Version};
use crate::database::entity::view::DEFAULT_VIEW;
use crate::database::entity::{package, PackageFormat};
use crate::database::{find_tree_node, find_view};
use crate::error::{ServerError, ServerResult};
use crate::tree;
use crate::{RequestState, State};
use depot::name::SpaceName;

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteTreeQuery {
    format: PackageFormat,
    path: String,
}

/// Soft-removes a directory or version subtree.
///
/// The tree nodes are removed immediately; every version they
/// referenced is soft-deleted along with its assets, and packages
/// left without live versions are soft-deleted too. Physical
/// reclamation is the sweep's job.
#[instrument(skip_all, fields(space, path))]
pub(crate) async fn delete_subtree(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path(space): Path<String>,
    Query(query): Query<DeleteTreeQuery>,
) -> ServerResult<StatusCode> {
    let space = SpaceName::new(space)?;
    req_state
        .auth
        .get_permission_for_space(&space)
        .require_delete()?;

    let database = state.database().await?;

    let node = find_tree_node(database, space.as_str(), query.format, &query.path)
        .await?
        .ok_or(ServerError::NotFound)?;

    let now = Utc::now();

    let txn = database
        .begin()
        .await
        .map_err(ServerError::database_error)?;

    let removed = tree::recurse_delete_by_id(&txn, node.id).await?;

    let version_ids: Vec<i64> = removed
        .iter()
        .filter(|n| n.node_type == TreeNodeType::Version)
        .filter_map(|n| n.version_id)
        .collect();

    let mut package_ids = HashSet::new();

    for version_id in &version_ids {
        let version = Version::find_by_id(*version_id)
            .one(&txn)
            .await
            .map_err(ServerError::database_error)?;

        let Some(version) = version else {
            continue;
        };
        package_ids.insert(version.package_id);

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
    }

    // Packages left without live versions go too
    for package_id in package_ids {
        let live = Version::find()
            .filter(version::Column::PackageId.eq(package_id))
            .filter(version::Column::DeletedAt.is_null())
            .count(&txn)
            .await
            .map_err(ServerError::database_error)?;

        if live == 0 {
            package::Entity::update(package::ActiveModel {
                id: Set(package_id),
                deleted_at: Set(Some(now)),
                ..Default::default()
            })
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;
        }
    }

    txn.commit().await.map_err(ServerError::database_error)?;

    // A Helm removal changes the repository index
    if query.format == PackageFormat::Helm {
        if let Some(view) = find_view(database, space.as_str(), DEFAULT_VIEW).await? {
            let store = state.store().await?;
            let creator = req_state.auth.username().unwrap_or("anonymous").to_string();

            crate::adapters::helm_index::regenerate(
                database,
                store,
                &view,
                space.as_str(),
                &creator,
            )
            .await?;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
