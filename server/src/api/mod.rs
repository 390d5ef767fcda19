//! HTTP API.

mod helm;
mod oci;
mod raw;
mod v1;

use axum::extract::DefaultBodyLimit;
use axum::Router;

/// Cap on buffered request bodies (multipart uploads, manifests).
///
/// Blob uploads stream and are not subject to this.
const MAX_BODY_SIZE: usize = 512 * 1024 * 1024;

pub(crate) fn get_router() -> Router {
    Router::new()
        .merge(oci::get_router())
        .merge(helm::get_router())
        .merge(raw::get_router())
        .merge(v1::get_router())
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
}
