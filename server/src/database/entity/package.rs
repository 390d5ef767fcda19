//! A named artifact family in a space.

use sea_orm::entity::prelude::*;

use super::PackageFormat;

pub type PackageModel = Model;

/// A package.
///
/// Unique on `(space, namespace, name, format)`. The namespace is
/// the raw upload group (dot-separated), or empty for formats
/// without one.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "package")]
pub struct Model {
    /// Unique numeric ID of the package.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Name of the owning space.
    #[sea_orm(indexed)]
    pub space: String,

    /// Dot-separated group, or empty.
    pub namespace: String,

    /// Name of the package.
    pub name: String,

    /// Artifact format.
    pub format: PackageFormat,

    /// Timestamp when the package is created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp when the package is last updated.
    pub updated_at: ChronoDateTimeUtc,

    /// Timestamp of the soft deletion, if any.
    pub deleted_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::version::Entity")]
    Version,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Related<super::version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Version.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
