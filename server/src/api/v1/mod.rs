mod assets;
mod capacity;
mod delete;
mod tree;

use axum::{
    routing::{delete as delete_route, get},
    Router,
};

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/_api/v1/spaces/:space/tree", get(tree::list_tree))
        .route(
            "/_api/v1/spaces/:space/tree",
            delete_route(delete::delete_subtree),
        )
        .route("/_api/v1/spaces/:space/assets", get(assets::list_assets))
        .route(
            "/_api/v1/spaces/:space/capacity",
            get(capacity::statistic_capacity),
        )
}
