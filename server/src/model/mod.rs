//! Model manager.
//!
//! Binds an upload descriptor to the Package → Version → Asset →
//! Blob graph according to the asset's binding attribute.

pub mod upload;

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait};
use serde_json::Value as JsonValue;

use crate::database::entity::asset::{self, AssetKind, AssetModel, Entity as Asset};
use crate::database::entity::blob::{self, BlobMetadata, Entity as Blob};
use crate::database::entity::package::{self, Entity as Package, PackageModel};
use crate::database::entity::version::{self, Entity as Version, VersionModel};
use crate::database::entity::view::ViewModel;
use crate::database::entity::{Json, PackageFormat};
use crate::database::{
    find_asset_by_version_path, find_asset_index, find_asset_isolated, find_package, find_version,
    update_blob_opt_lock,
};
use crate::error::{ServerError, ServerResult};
use crate::tree;
use depot::hash::ChecksumSet;

/// Asset binding attribute.
///
/// Decides the uniqueness key of the asset and whether siblings are
/// displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetAttr {
    /// Bound to a version, keyed by `(version_id, path)`.
    Normal,

    /// Like `Normal`, but writing it soft-deletes every other asset
    /// of the version (container tag manifests).
    Exclusive,

    /// Keyed by `(path, format)` without a version; shared
    /// content-addressed bytes.
    Isolated,

    /// View-level meta asset keyed by `(view_id, path, format)`
    /// (e.g. the Helm `index.yaml`).
    Index,
}

/// One asset of an upload, together with its payload coordinates.
#[derive(Debug, Clone)]
pub struct AssetSpec {
    pub path: String,
    pub kind: AssetKind,
    pub content_type: String,
    pub check_sum: ChecksumSet,
    pub metadata: JsonValue,
    pub blob_ref: String,
    pub size: i64,
}

/// Everything the model manager needs to bind one upload.
#[derive(Debug, Clone)]
pub struct AssetDescriptor {
    pub space: String,
    pub format: PackageFormat,
    pub attr: AssetAttr,

    /// Package coordinates; unused for isolated and index assets.
    pub name: String,
    pub namespace: String,
    pub version: String,

    /// Version-level metadata (e.g. Helm chart metadata).
    pub version_metadata: JsonValue,

    pub main_asset: AssetSpec,
    pub sub_assets: Vec<AssetSpec>,

    pub creator: String,
}

/// Result of a sync.
#[derive(Debug)]
pub struct SyncOutcome {
    /// The resolved version, for version-bound attributes.
    pub version: Option<VersionModel>,

    /// The main asset after the write.
    pub asset: AssetModel,

    /// Whether anything changed.
    ///
    /// False when the payload was byte-identical to the stored one.
    pub changed: bool,
}

/// Syncs an upload descriptor into the model.
///
/// Routes on the binding attribute; all writes go through the given
/// connection, which the caller is expected to make a transaction.
pub async fn sync<C: ConnectionTrait>(
    conn: &C,
    view: &ViewModel,
    descriptor: &AssetDescriptor,
) -> ServerResult<SyncOutcome> {
    match descriptor.attr {
        AssetAttr::Isolated => {
            let existing =
                find_asset_isolated(conn, &descriptor.main_asset.path, descriptor.format).await?;
            let (asset, changed) =
                upsert_asset(conn, view, descriptor, &descriptor.main_asset, existing, None).await?;

            Ok(SyncOutcome {
                version: None,
                asset,
                changed,
            })
        }
        AssetAttr::Index => {
            let existing = find_asset_index(
                conn,
                view.id,
                &descriptor.main_asset.path,
                descriptor.format,
            )
            .await?;
            let (asset, changed) =
                upsert_asset(conn, view, descriptor, &descriptor.main_asset, existing, None).await?;

            Ok(SyncOutcome {
                version: None,
                asset,
                changed,
            })
        }
        AssetAttr::Normal | AssetAttr::Exclusive => {
            let package = resolve_package(conn, descriptor).await?;
            let version = resolve_version(conn, view, &package, descriptor).await?;

            let existing =
                find_asset_by_version_path(conn, version.id, &descriptor.main_asset.path).await?;
            let (asset, changed) = upsert_asset(
                conn,
                view,
                descriptor,
                &descriptor.main_asset,
                existing,
                Some(version.id),
            )
            .await?;

            if changed {
                for sub in &descriptor.sub_assets {
                    let existing = find_asset_by_version_path(conn, version.id, &sub.path).await?;
                    match upsert_asset(conn, view, descriptor, sub, existing, Some(version.id)).await
                    {
                        // A sub-asset identical to the stored one is
                        // left alone
                        Ok(_) | Err(ServerError::FileNotChanged) => {}
                        Err(e) => return Err(e),
                    }
                }

                if descriptor.attr == AssetAttr::Exclusive {
                    displace_siblings(conn, version.id, asset.id).await?;
                }
            }

            Ok(SyncOutcome {
                version: Some(version),
                asset,
                changed,
            })
        }
    }
}

/// Resolves the package, undeleting or creating it as needed.
async fn resolve_package<C: ConnectionTrait>(
    conn: &C,
    descriptor: &AssetDescriptor,
) -> ServerResult<PackageModel> {
    let now = Utc::now();

    let found = find_package(
        conn,
        &descriptor.space,
        &descriptor.namespace,
        &descriptor.name,
        descriptor.format,
    )
    .await?;

    match found {
        Some(package) if package.is_deleted() => {
            Package::update(package::ActiveModel {
                id: Set(package.id),
                deleted_at: Set(None),
                updated_at: Set(now),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)
        }
        Some(package) => Ok(package),
        None => {
            let insertion = Package::insert(package::ActiveModel {
                space: Set(descriptor.space.clone()),
                namespace: Set(descriptor.namespace.clone()),
                name: Set(descriptor.name.clone()),
                format: Set(descriptor.format),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;

            Package::find_by_id(insertion.last_insert_id)
                .one(conn)
                .await
                .map_err(ServerError::database_error)?
                .ok_or(ServerError::NoSuchPackage)
        }
    }
}

/// Resolves the version, undeleting or creating it as needed, and
/// materializes its tree path.
async fn resolve_version<C: ConnectionTrait>(
    conn: &C,
    view: &ViewModel,
    package: &PackageModel,
    descriptor: &AssetDescriptor,
) -> ServerResult<VersionModel> {
    let now = Utc::now();

    let found = find_version(conn, package.id, view.id, &descriptor.version).await?;

    let version = match found {
        Some(version) if version.is_deleted() => {
            Version::update(version::ActiveModel {
                id: Set(version.id),
                deleted_at: Set(None),
                updated_at: Set(now),
                metadata: Set(Json(descriptor.version_metadata.clone())),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?
        }
        Some(version) => version,
        None => {
            let insertion = Version::insert(version::ActiveModel {
                package_id: Set(package.id),
                view_id: Set(view.id),
                version: Set(descriptor.version.clone()),
                metadata: Set(Json(descriptor.version_metadata.clone())),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;

            Version::find_by_id(insertion.last_insert_id)
                .one(conn)
                .await
                .map_err(ServerError::database_error)?
                .ok_or(ServerError::NoSuchVersion)?
        }
    };

    tree::recurse_create(
        conn,
        &descriptor.space,
        descriptor.format,
        &package.namespace,
        &package.name,
        &version.version,
        version.id,
    )
    .await?;

    Ok(version)
}

/// Creates or updates one asset row per the create/update policies.
///
/// Returns the asset and whether the payload changed.
async fn upsert_asset<C: ConnectionTrait>(
    conn: &C,
    view: &ViewModel,
    descriptor: &AssetDescriptor,
    spec: &AssetSpec,
    existing: Option<AssetModel>,
    version_id: Option<i64>,
) -> ServerResult<(AssetModel, bool)> {
    let now = Utc::now();

    match existing {
        None => {
            let blob_id = insert_blob(conn, view, spec, &descriptor.creator).await?;

            let insertion = Asset::insert(asset::ActiveModel {
                version_id: Set(version_id),
                view_id: Set(Some(view.id)),
                path: Set(spec.path.clone()),
                format: Set(descriptor.format),
                kind: Set(spec.kind),
                content_type: Set(spec.content_type.clone()),
                blob_id: Set(blob_id),
                check_sum: Set(Json(spec.check_sum.clone())),
                metadata: Set(Json(spec.metadata.clone())),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;

            let asset = Asset::find_by_id(insertion.last_insert_id)
                .one(conn)
                .await
                .map_err(ServerError::database_error)?
                .ok_or(ServerError::NoSuchAsset)?;

            Ok((asset, true))
        }
        Some(current) => {
            if current.sha256() == spec.check_sum.sha256 {
                return Err(ServerError::FileNotChanged);
            }

            let previous_blob_id = current.blob_id;
            let blob_id = insert_blob(conn, view, spec, &descriptor.creator).await?;

            let asset = Asset::update(asset::ActiveModel {
                id: Set(current.id),
                blob_id: Set(blob_id),
                content_type: Set(spec.content_type.clone()),
                check_sum: Set(Json(spec.check_sum.clone())),
                metadata: Set(Json(spec.metadata.clone())),
                updated_at: Set(now),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;

            // The replaced payload is reclaimed by the soft-remove
            // sweep after retention.
            update_blob_opt_lock(conn, previous_blob_id, |_current, change| {
                change.deleted_at = Set(Some(now));
            })
            .await?;

            if let Some(version_id) = version_id {
                Version::update(version::ActiveModel {
                    id: Set(version_id),
                    updated_at: Set(asset.updated_at),
                    ..Default::default()
                })
                .exec(conn)
                .await
                .map_err(ServerError::database_error)?;
            }

            Ok((asset, true))
        }
    }
}

/// Allocates a blob row for a payload.
async fn insert_blob<C: ConnectionTrait>(
    conn: &C,
    view: &ViewModel,
    spec: &AssetSpec,
    creator: &str,
) -> ServerResult<i64> {
    let insertion = Blob::insert(blob::ActiveModel {
        storage_id: Set(view.storage_id.clone()),
        blob_ref: Set(spec.blob_ref.clone()),
        size: Set(spec.size),
        metadata: Set(Json(BlobMetadata::default())),
        creator: Set(creator.to_owned()),
        version: Set(0),
        created_at: Set(Utc::now()),
        deleted_at: Set(None),
        ..Default::default()
    })
    .exec(conn)
    .await
    .map_err(ServerError::database_error)?;

    Ok(insertion.last_insert_id)
}

/// Soft-deletes every other asset of a version.
async fn displace_siblings<C: ConnectionTrait>(
    conn: &C,
    version_id: i64,
    keep_asset_id: i64,
) -> ServerResult<()> {
    Asset::update_many()
        .col_expr(
            asset::Column::DeletedAt,
            sea_orm::sea_query::Expr::value(Utc::now()),
        )
        .filter(asset::Column::VersionId.eq(version_id))
        .filter(asset::Column::Id.ne(keep_asset_id))
        .filter(asset::Column::DeletedAt.is_null())
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    Ok(())
}
