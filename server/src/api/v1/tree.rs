//! Tree browsing.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::access::require_pull;
use crate::database::entity::tree_node::{TreeNodeModel, TreeNodeType};
use crate::database::entity::PackageFormat;
use crate::error::ServerResult;
use crate::tree;
use crate::{RequestState, State};
use depot::name::SpaceName;

#[derive(Debug, Deserialize)]
pub(crate) struct ListTreeQuery {
    format: PackageFormat,
    path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TreeEntry {
    id: i64,
    name: String,
    path: String,
    r#type: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    version_id: Option<i64>,
}

impl From<TreeNodeModel> for TreeEntry {
    fn from(node: TreeNodeModel) -> Self {
        Self {
            id: node.id,
            name: node.name,
            path: node.path,
            r#type: match node.node_type {
                TreeNodeType::Format => "format",
                TreeNodeType::Directory => "directory",
                TreeNodeType::Version => "version",
            },
            version_id: node.version_id,
        }
    }
}

/// Lists the children of a tree path.
#[instrument(skip_all, fields(space))]
pub(crate) async fn list_tree(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path(space): Path<String>,
    Query(query): Query<ListTreeQuery>,
) -> ServerResult<Json<Vec<TreeEntry>>> {
    let space = SpaceName::new(space)?;
    require_pull(&req_state.auth.get_permission_for_space(&space))?;

    let database = state.database().await?;

    let mut nodes = tree::list_children(
        database,
        space.as_str(),
        query.format,
        query.path.as_deref(),
    )
    .await?;
    nodes.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(nodes.into_iter().map(TreeEntry::from).collect()))
}
