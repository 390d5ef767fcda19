pub mod entity;
pub mod migration;

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::query::QueryOrder;
use sea_orm::{ActiveValue::Set, ConnectionTrait};

use crate::error::{ServerError, ServerResult};
use entity::asset::{self, AssetModel, Entity as Asset};
use entity::blob::{self, BlobModel, Entity as Blob};
use entity::package::{self, Entity as Package, PackageModel};
use entity::setting::{self, Entity as Setting};
use entity::tree_node::{self, Entity as TreeNode, TreeNodeModel};
use entity::version::{self, Entity as Version, VersionModel};
use entity::view::{self, Entity as View, ViewModel, DEFAULT_VIEW};
use entity::PackageFormat;

/// An asset joined with its blob.
///
/// This is the projection the garbage collector and the capacity
/// reports work on.
#[derive(Debug, Clone)]
pub struct AssetExtendBlob {
    pub asset: AssetModel,
    pub blob: BlobModel,
}

/// Retrieves a view, creating the space's `default` view on first
/// use.
pub async fn find_or_create_default_view<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    storage_id: &str,
) -> ServerResult<ViewModel> {
    if let Some(found) = find_view(conn, space, DEFAULT_VIEW).await? {
        return Ok(found);
    }

    let insertion = View::insert(view::ActiveModel {
        space: Set(space.to_owned()),
        name: Set(DEFAULT_VIEW.to_owned()),
        storage_id: Set(storage_id.to_owned()),
        created_at: Set(Utc::now()),
        ..Default::default()
    })
    .exec(conn)
    .await
    .map_err(ServerError::database_error)?;

    View::find_by_id(insertion.last_insert_id)
        .one(conn)
        .await
        .map_err(ServerError::database_error)?
        .ok_or(ServerError::NoSuchView)
}

/// Retrieves a view by name.
pub async fn find_view<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    name: &str,
) -> ServerResult<Option<ViewModel>> {
    View::find()
        .filter(view::Column::Space.eq(space))
        .filter(view::Column::Name.eq(name))
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves a package by its coordinates, including soft-deleted
/// rows.
pub async fn find_package<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    namespace: &str,
    name: &str,
    format: PackageFormat,
) -> ServerResult<Option<PackageModel>> {
    Package::find()
        .filter(package::Column::Space.eq(space))
        .filter(package::Column::Namespace.eq(namespace))
        .filter(package::Column::Name.eq(name))
        .filter(package::Column::Format.eq(format))
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves a version of a package, including soft-deleted rows.
pub async fn find_version<C: ConnectionTrait>(
    conn: &C,
    package_id: i64,
    view_id: i64,
    version: &str,
) -> ServerResult<Option<VersionModel>> {
    Version::find()
        .filter(version::Column::PackageId.eq(package_id))
        .filter(version::Column::ViewId.eq(view_id))
        .filter(version::Column::Version.eq(version))
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves a live version by its coordinates.
pub async fn find_live_version<C: ConnectionTrait>(
    conn: &C,
    package_id: i64,
    view_id: i64,
    version: &str,
) -> ServerResult<Option<VersionModel>> {
    Ok(find_version(conn, package_id, view_id, version)
        .await?
        .filter(|v| !v.is_deleted()))
}

/// Lists the live versions of a package in a view, newest first.
pub async fn list_live_versions<C: ConnectionTrait>(
    conn: &C,
    package_id: i64,
    view_id: i64,
) -> ServerResult<Vec<VersionModel>> {
    Version::find()
        .filter(version::Column::PackageId.eq(package_id))
        .filter(version::Column::ViewId.eq(view_id))
        .filter(version::Column::DeletedAt.is_null())
        .order_by_desc(version::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves an asset bound to a version, by path.
pub async fn find_asset_by_version_path<C: ConnectionTrait>(
    conn: &C,
    version_id: i64,
    path: &str,
) -> ServerResult<Option<AssetModel>> {
    Asset::find()
        .filter(asset::Column::VersionId.eq(version_id))
        .filter(asset::Column::Path.eq(path))
        .filter(asset::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves an isolated asset by `(path, format)`.
pub async fn find_asset_isolated<C: ConnectionTrait>(
    conn: &C,
    path: &str,
    format: PackageFormat,
) -> ServerResult<Option<AssetModel>> {
    Asset::find()
        .filter(asset::Column::Path.eq(path))
        .filter(asset::Column::Format.eq(format))
        .filter(asset::Column::VersionId.is_null())
        .filter(asset::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves an index-kind meta asset by `(view_id, path, format)`.
pub async fn find_asset_index<C: ConnectionTrait>(
    conn: &C,
    view_id: i64,
    path: &str,
    format: PackageFormat,
) -> ServerResult<Option<AssetModel>> {
    Asset::find()
        .filter(asset::Column::ViewId.eq(view_id))
        .filter(asset::Column::Path.eq(path))
        .filter(asset::Column::Format.eq(format))
        .filter(asset::Column::VersionId.is_null())
        .filter(asset::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves any live asset addressed by a content digest.
///
/// Finds both isolated (digest-pushed) and tagged (version-bound)
/// container assets.
pub async fn find_asset_by_digest<C: ConnectionTrait>(
    conn: &C,
    path: &str,
    format: PackageFormat,
) -> ServerResult<Option<AssetModel>> {
    Asset::find()
        .filter(asset::Column::Path.eq(path))
        .filter(asset::Column::Format.eq(format))
        .filter(asset::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves a live asset by path within a view, regardless of its
/// version binding.
pub async fn find_asset_in_view<C: ConnectionTrait>(
    conn: &C,
    view_id: i64,
    path: &str,
    format: PackageFormat,
) -> ServerResult<Option<AssetModel>> {
    Asset::find()
        .filter(asset::Column::ViewId.eq(view_id))
        .filter(asset::Column::Path.eq(path))
        .filter(asset::Column::Format.eq(format))
        .filter(asset::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Lists the assets of a version.
pub async fn list_version_assets<C: ConnectionTrait>(
    conn: &C,
    version_id: i64,
) -> ServerResult<Vec<AssetModel>> {
    Asset::find()
        .filter(asset::Column::VersionId.eq(version_id))
        .filter(asset::Column::DeletedAt.is_null())
        .all(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Retrieves a blob by ID.
pub async fn get_blob<C: ConnectionTrait>(conn: &C, id: i64) -> ServerResult<BlobModel> {
    Blob::find_by_id(id)
        .one(conn)
        .await
        .map_err(ServerError::database_error)?
        .ok_or(ServerError::NoSuchBlob)
}

/// Retrieves a blob by its storage coordinates.
pub async fn find_blob_by_ref<C: ConnectionTrait>(
    conn: &C,
    storage_id: &str,
    blob_ref: &str,
) -> ServerResult<Option<BlobModel>> {
    Blob::find()
        .filter(blob::Column::StorageId.eq(storage_id))
        .filter(blob::Column::BlobRef.eq(blob_ref))
        .filter(blob::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Joins assets with their blobs, for a format.
///
/// Includes soft-deleted rows; callers filter by lifecycle as
/// needed.
pub async fn list_assets_with_blobs<C: ConnectionTrait>(
    conn: &C,
    format: Option<PackageFormat>,
) -> ServerResult<Vec<AssetExtendBlob>> {
    let mut query = Asset::find().find_also_related(Blob);

    if let Some(format) = format {
        query = query.filter(asset::Column::Format.eq(format));
    }

    let rows = query.all(conn).await.map_err(ServerError::database_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|(asset, blob)| blob.map(|blob| AssetExtendBlob { asset, blob }))
        .collect())
}

/// Retrieves a tree node by its materialized path.
pub async fn find_tree_node<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    format: PackageFormat,
    path: &str,
) -> ServerResult<Option<TreeNodeModel>> {
    TreeNode::find()
        .filter(tree_node::Column::Space.eq(space))
        .filter(tree_node::Column::Format.eq(format))
        .filter(tree_node::Column::Path.eq(path))
        .one(conn)
        .await
        .map_err(ServerError::database_error)
}

/// Reads a persisted setting.
pub async fn get_setting<C: ConnectionTrait>(conn: &C, name: &str) -> ServerResult<Option<String>> {
    let row = Setting::find()
        .filter(setting::Column::Name.eq(name))
        .one(conn)
        .await
        .map_err(ServerError::database_error)?;

    Ok(row.map(|r| r.value))
}

/// Writes a persisted setting.
pub async fn put_setting<C: ConnectionTrait>(conn: &C, name: &str, value: &str) -> ServerResult<()> {
    let existing = Setting::find()
        .filter(setting::Column::Name.eq(name))
        .one(conn)
        .await
        .map_err(ServerError::database_error)?;

    match existing {
        Some(row) => {
            Setting::update(setting::ActiveModel {
                id: Set(row.id),
                value: Set(value.to_owned()),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;
        }
        None => {
            Setting::insert(setting::ActiveModel {
                name: Set(name.to_owned()),
                value: Set(value.to_owned()),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;
        }
    }

    Ok(())
}

/// Updates a blob under optimistic locking.
///
/// The mutation closure is re-applied to a freshly-read row until
/// the `WHERE id = ? AND version = ?` update lands, so it must be
/// idempotent across retries.
pub async fn update_blob_opt_lock<C, F>(conn: &C, blob_id: i64, mutate: F) -> ServerResult<BlobModel>
where
    C: ConnectionTrait,
    F: Fn(&BlobModel, &mut blob::ActiveModel),
{
    loop {
        let current = get_blob(conn, blob_id).await?;

        let mut change = <blob::ActiveModel as std::default::Default>::default();
        mutate(&current, &mut change);
        change.version = Set(current.version + 1);

        let updated = Blob::update_many()
            .set(change)
            .filter(blob::Column::Id.eq(blob_id))
            .filter(blob::Column::Version.eq(current.version))
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;

        if updated.rows_affected == 1 {
            return get_blob(conn, blob_id).await;
        }

        tracing::debug!(blob_id, "Optimistic lock conflict, retrying");
    }
}
