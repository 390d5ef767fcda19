//! Materialized-path index for UI browsing.

use sea_orm::entity::prelude::*;

use super::PackageFormat;

pub type TreeNodeModel = Model;

/// The type of a tree node.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TreeNodeType {
    /// A per-format root node.
    #[sea_orm(string_value = "format")]
    Format,

    /// An intermediate path segment.
    #[sea_orm(string_value = "directory")]
    Directory,

    /// A leaf carrying a version ID.
    #[sea_orm(string_value = "version")]
    Version,
}

/// A tree node.
///
/// Nodes form a forest rooted at per-format nodes under a space.
/// `path` is always `"/" + join(segments, "/")`; for a version node
/// it encodes `namespace…/name/version` with namespace dots expanded
/// to slashes. Unique on `(space, format, path)`.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tree_node")]
pub struct Model {
    /// Unique numeric ID of the node.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Name of the owning space.
    #[sea_orm(indexed)]
    pub space: String,

    /// ID of the parent node; absent for the per-format roots.
    pub parent_id: Option<i64>,

    /// Materialized path of the node.
    pub path: String,

    /// Last path segment.
    pub name: String,

    /// Node type.
    pub node_type: TreeNodeType,

    /// Artifact format of the subtree.
    pub format: PackageFormat,

    /// ID of the version for version nodes.
    pub version_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
