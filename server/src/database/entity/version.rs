//! One release of a package.

use sea_orm::entity::prelude::*;

use super::Json;

pub type VersionModel = Model;

/// A version.
///
/// Unique on `(package_id, view_id, version)`. Container tags are
/// bookkept as versions of their repository's package.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "version")]
pub struct Model {
    /// Unique numeric ID of the version.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// ID of the package this version belongs to.
    #[sea_orm(indexed)]
    pub package_id: i64,

    /// ID of the view holding the version's assets.
    pub view_id: i64,

    /// The version string (or container tag).
    pub version: String,

    /// Format-specific metadata (e.g. Helm chart metadata).
    pub metadata: Json<serde_json::Value>,

    /// Timestamp when the version is created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp when the version is last updated.
    pub updated_at: ChronoDateTimeUtc,

    /// Timestamp of the soft deletion, if any.
    pub deleted_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::package::Entity",
        from = "Column::PackageId",
        to = "super::package::Column::Id"
    )]
    Package,

    #[sea_orm(
        belongs_to = "super::view::Entity",
        from = "Column::ViewId",
        to = "super::view::Column::Id"
    )]
    View,

    #[sea_orm(has_many = "super::asset::Entity")]
    Asset,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Related<super::package::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Package.def()
    }
}

impl Related<super::view::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::View.def()
    }
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Asset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
