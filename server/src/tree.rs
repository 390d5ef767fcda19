//! Tree node index.
//!
//! A materialized-path forest per space and format, used by the UI
//! to browse `format/group/package/version`. Nodes are only ever
//! addressed by ID or path; no node references are held across
//! transactions.

use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait};

use crate::database::entity::tree_node::{self, Entity as TreeNode, TreeNodeModel, TreeNodeType};
use crate::database::entity::PackageFormat;
use crate::database::find_tree_node;
use crate::error::{ServerError, ServerResult};

/// Builds the materialized path of a version.
///
/// Namespace dots expand to slashes:
/// `("easycorp.pangu", "gitfox", "1.0.0")` becomes
/// `/easycorp/pangu/gitfox/1.0.0`.
pub fn build_version_path(namespace: &str, name: &str, version: &str) -> String {
    let mut segments: Vec<&str> = namespace.split('.').filter(|s| !s.is_empty()).collect();
    segments.push(name);
    segments.push(version);

    format!("/{}", segments.join("/"))
}

/// Ensures every prefix of a version path exists, then the version
/// leaf itself.
pub async fn recurse_create<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    format: PackageFormat,
    namespace: &str,
    name: &str,
    version: &str,
    version_id: i64,
) -> ServerResult<()> {
    let mut segments: Vec<&str> = namespace.split('.').filter(|s| !s.is_empty()).collect();
    segments.push(name);
    segments.push(version);

    let mut parent_id = ensure_root(conn, space, format).await?;
    let mut path = String::new();

    for (i, segment) in segments.iter().enumerate() {
        path.push('/');
        path.push_str(segment);

        let is_leaf = i == segments.len() - 1;
        let node_type = if is_leaf {
            TreeNodeType::Version
        } else {
            TreeNodeType::Directory
        };

        let existing = find_tree_node(conn, space, format, &path).await?;

        let node_id = match existing {
            Some(node) => {
                if is_leaf && node.version_id != Some(version_id) {
                    TreeNode::update(tree_node::ActiveModel {
                        id: Set(node.id),
                        version_id: Set(Some(version_id)),
                        ..Default::default()
                    })
                    .exec(conn)
                    .await
                    .map_err(ServerError::database_error)?;
                }

                node.id
            }
            None => {
                let insertion = TreeNode::insert(tree_node::ActiveModel {
                    space: Set(space.to_owned()),
                    parent_id: Set(Some(parent_id)),
                    path: Set(path.clone()),
                    name: Set((*segment).to_owned()),
                    node_type: Set(node_type),
                    format: Set(format),
                    version_id: Set(is_leaf.then_some(version_id)),
                    ..Default::default()
                })
                .exec(conn)
                .await
                .map_err(ServerError::database_error)?;

                insertion.last_insert_id
            }
        };

        parent_id = node_id;
    }

    Ok(())
}

/// Removes a version leaf.
pub async fn delete_version_node<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    format: PackageFormat,
    namespace: &str,
    name: &str,
    version: &str,
) -> ServerResult<()> {
    let path = build_version_path(namespace, name, version);

    TreeNode::delete_many()
        .filter(tree_node::Column::Space.eq(space))
        .filter(tree_node::Column::Format.eq(format))
        .filter(tree_node::Column::Path.eq(path))
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    Ok(())
}

/// Deletes a node and its whole subtree, returning the removed
/// nodes so the caller can soft-delete what they referenced.
pub async fn recurse_delete_by_id<C: ConnectionTrait>(
    conn: &C,
    node_id: i64,
) -> ServerResult<Vec<TreeNodeModel>> {
    let node = TreeNode::find_by_id(node_id)
        .one(conn)
        .await
        .map_err(ServerError::database_error)?
        .ok_or(ServerError::NotFound)?;

    let subtree = TreeNode::find()
        .filter(tree_node::Column::Space.eq(node.space.clone()))
        .filter(tree_node::Column::Format.eq(node.format))
        .filter(
            tree_node::Column::Path
                .eq(node.path.clone())
                .or(tree_node::Column::Path.starts_with(format!("{}/", node.path))),
        )
        .all(conn)
        .await
        .map_err(ServerError::database_error)?;

    let ids: Vec<i64> = subtree.iter().map(|n| n.id).collect();

    TreeNode::delete_many()
        .filter(tree_node::Column::Id.is_in(ids))
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    Ok(subtree)
}

/// Lists the children of a node (or the per-format roots when no
/// parent is given).
pub async fn list_children<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    format: PackageFormat,
    parent_path: Option<&str>,
) -> ServerResult<Vec<TreeNodeModel>> {
    let query = TreeNode::find()
        .filter(tree_node::Column::Space.eq(space))
        .filter(tree_node::Column::Format.eq(format));

    let query = match parent_path {
        Some(path) => {
            let parent = find_tree_node(conn, space, format, path)
                .await?
                .ok_or(ServerError::NotFound)?;
            query.filter(tree_node::Column::ParentId.eq(parent.id))
        }
        None => {
            let root = find_tree_node(conn, space, format, "/").await?;
            match root {
                Some(root) => query.filter(tree_node::Column::ParentId.eq(root.id)),
                None => return Ok(Vec::new()),
            }
        }
    };

    query.all(conn).await.map_err(ServerError::database_error)
}

/// Ensures the per-format root node of a space.
async fn ensure_root<C: ConnectionTrait>(
    conn: &C,
    space: &str,
    format: PackageFormat,
) -> ServerResult<i64> {
    if let Some(root) = find_tree_node(conn, space, format, "/").await? {
        return Ok(root.id);
    }

    let name = match format {
        PackageFormat::Container => "container",
        PackageFormat::Helm => "helm",
        PackageFormat::Raw => "raw",
    };

    let insertion = TreeNode::insert(tree_node::ActiveModel {
        space: Set(space.to_owned()),
        parent_id: Set(None),
        path: Set("/".to_owned()),
        name: Set(name.to_owned()),
        node_type: Set(TreeNodeType::Format),
        format: Set(format),
        version_id: Set(None),
        ..Default::default()
    })
    .exec(conn)
    .await
    .map_err(ServerError::database_error)?;

    Ok(insertion.last_insert_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_version_path() {
        assert_eq!(
            "/easycorp/pangu/gitfox/1.0.0",
            build_version_path("easycorp.pangu", "gitfox", "1.0.0")
        );
        assert_eq!("/gitfox/1.0.0", build_version_path("", "gitfox", "1.0.0"));
        assert_eq!(
            "/alpine/v1",
            build_version_path("", "alpine", "v1")
        );
    }
}
