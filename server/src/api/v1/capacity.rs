//! Capacity statistics.

use axum::extract::{Extension, Path};
use axum::Json;
use sea_orm::entity::prelude::*;
use serde::Serialize;
use tracing::instrument;

use crate::access::require_pull;
use crate::database::entity::asset::{self, Entity as Asset};
use crate::database::entity::blob::Entity as Blob;
use crate::database::entity::view::{self, Entity as View};
use crate::error::{ServerError, ServerResult};
use crate::{RequestState, State};
use depot::name::SpaceName;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CapacityReport {
    total_size: i64,
    total_refs: i64,
}

/// Reports the live storage footprint of a space.
#[instrument(skip_all, fields(space))]
pub(crate) async fn statistic_capacity(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path(space): Path<String>,
) -> ServerResult<Json<CapacityReport>> {
    let space = SpaceName::new(space)?;
    require_pull(&req_state.auth.get_permission_for_space(&space))?;

    let database = state.database().await?;

    let views = View::find()
        .filter(view::Column::Space.eq(space.as_str()))
        .all(database)
        .await
        .map_err(ServerError::database_error)?;
    let view_ids: Vec<i64> = views.iter().map(|v| v.id).collect();

    if view_ids.is_empty() {
        return Ok(Json(CapacityReport {
            total_size: 0,
            total_refs: 0,
        }));
    }

    let rows = Asset::find()
        .find_also_related(Blob)
        .filter(asset::Column::ViewId.is_in(view_ids))
        .filter(asset::Column::DeletedAt.is_null())
        .all(database)
        .await
        .map_err(ServerError::database_error)?;

    let mut total_size = 0i64;
    let mut total_refs = 0i64;

    for (_asset, blob) in rows {
        if let Some(blob) = blob.filter(|b| !b.is_deleted()) {
            total_size += blob.size;
            total_refs += 1;
        }
    }

    Ok(Json(CapacityReport {
        total_size,
        total_refs,
    }))
}
