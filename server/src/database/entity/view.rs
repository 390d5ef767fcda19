//! A named artifact bucket inside a space.

use sea_orm::entity::prelude::*;

pub type ViewModel = Model;

/// Name of the view every space gets implicitly.
pub const DEFAULT_VIEW: &str = "default";

/// A view.
///
/// An artifact is addressable as `space@view`. Every space has a
/// `default` view, created on first use. The view carries the
/// storage ID locating the backing driver.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "view")]
pub struct Model {
    /// Unique numeric ID of the view.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Name of the owning space.
    ///
    /// Spaces live in the surrounding platform's database and are
    /// referenced by name here.
    #[sea_orm(indexed)]
    pub space: String,

    /// Name of the view.
    pub name: String,

    /// Identifier of the backing storage driver.
    #[sea_orm(column_type = "String(StringLen::N(64))")]
    pub storage_id: String,

    /// Timestamp when the view is created.
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::version::Entity")]
    Version,
}

impl Related<super::version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Version.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
