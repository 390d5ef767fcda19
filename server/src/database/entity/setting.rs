//! Process-wide persisted settings.

use sea_orm::entity::prelude::*;

pub type SettingModel = Model;

/// Setting key for the container read-only flag.
pub const CONTAINER_READ_ONLY: &str = "container_read_only";

/// A setting.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "setting")]
pub struct Model {
    /// Unique numeric ID of the setting.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Name of the setting.
    #[sea_orm(unique)]
    pub name: String,

    /// Value of the setting.
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
