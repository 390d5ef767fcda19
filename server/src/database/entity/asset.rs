//! A named file belonging to a version or a view.

use sea_orm::entity::prelude::*;

use super::{Json, PackageFormat};
use depot::hash::ChecksumSet;

pub type AssetModel = Model;

/// The role of an asset within its version.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(4))")]
pub enum AssetKind {
    /// The primary payload.
    #[sea_orm(string_value = "main")]
    Main,

    /// A derived or auxiliary payload.
    #[sea_orm(string_value = "sub")]
    Sub,
}

/// An asset.
///
/// Semantic uniqueness depends on how the asset is bound:
///
/// - bound to a version: `(version_id, path)`
/// - isolated (content-addressed container bytes): `(path, format)`
/// - index-kind (view-level meta asset): `(view_id, path, format)`
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "asset")]
pub struct Model {
    /// Unique numeric ID of the asset.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// ID of the owning version; absent for isolated and index
    /// assets.
    #[sea_orm(indexed)]
    pub version_id: Option<i64>,

    /// ID of the view holding the asset.
    pub view_id: Option<i64>,

    /// Path of the asset within its package (or the content address
    /// for container assets).
    #[sea_orm(indexed)]
    pub path: String,

    /// Artifact format.
    pub format: PackageFormat,

    /// Role of the asset.
    pub kind: AssetKind,

    /// MIME type served on download.
    pub content_type: String,

    /// ID of the blob holding the bytes.
    pub blob_id: i64,

    /// All digests of the payload.
    pub check_sum: Json<ChecksumSet>,

    /// Format-specific metadata.
    pub metadata: Json<serde_json::Value>,

    /// Timestamp when the asset is created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp when the asset is last updated.
    pub updated_at: ChronoDateTimeUtc,

    /// Timestamp of the soft deletion, if any.
    pub deleted_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::version::Entity",
        from = "Column::VersionId",
        to = "super::version::Column::Id"
    )]
    Version,

    #[sea_orm(
        belongs_to = "super::blob::Entity",
        from = "Column::BlobId",
        to = "super::blob::Column::Id"
    )]
    Blob,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the SHA-256 of the payload, in hex.
    pub fn sha256(&self) -> &str {
        &self.check_sum.0.sha256
    }
}

impl Related<super::version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Version.def()
    }
}

impl Related<super::blob::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Blob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
