//! Container registry API.
//!
//! A subset of the OCI Distribution Spec: blobs, resumable uploads,
//! manifests by tag or digest, and the tags list, under
//! `/v2/<space>/<repo>/`.

mod blobs;
pub mod error;
mod manifests;
mod uploads;

use axum::{
    extract::{Extension, Path},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::{json, Value as JsonValue};

use crate::access::{issue_short_lived_token, SpacePermission};
use crate::adapters::container::ManifestReference;
use crate::database::entity::view::ViewModel;
use crate::error::ServerError;
use crate::{RequestState, State};
use depot::digest::Digest;
use depot::name::{RepoName, SpaceName, TagName};
use error::{OciError, OciResult};

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/v2/", get(base))
        .route("/v2/token", get(token))
        .route("/v2/:space/:repo/blobs/:digest", get(blobs::get_blob))
        .route("/v2/:space/:repo/blobs/:digest", delete(blobs::delete_blob))
        .route("/v2/:space/:repo/blobs/uploads/", post(uploads::start_upload))
        .route(
            "/v2/:space/:repo/blobs/uploads/:session",
            get(uploads::get_upload_status),
        )
        .route(
            "/v2/:space/:repo/blobs/uploads/:session",
            patch(uploads::patch_upload),
        )
        .route(
            "/v2/:space/:repo/blobs/uploads/:session",
            put(uploads::put_upload),
        )
        .route(
            "/v2/:space/:repo/blobs/uploads/:session",
            delete(uploads::delete_upload),
        )
        .route(
            "/v2/:space/:repo/manifests/:reference",
            get(manifests::get_manifest),
        )
        .route(
            "/v2/:space/:repo/manifests/:reference",
            put(manifests::put_manifest),
        )
        .route(
            "/v2/:space/:repo/manifests/:reference",
            delete(manifests::delete_manifest),
        )
        .route("/v2/:space/:repo/tags/list", get(manifests::tags_list))
}

/// API version check.
///
/// Anonymous requests get the 401 challenge so clients enter the
/// token flow.
async fn base(Extension(req_state): Extension<RequestState>) -> OciResult<Json<JsonValue>> {
    if !req_state.auth.is_authenticated() {
        return Err(OciError::unauthorized());
    }

    Ok(Json(json!({})))
}

/// Token endpoint for `docker login`.
///
/// Basic credentials must carry a valid token as the password; an
/// existing Bearer session is re-issued. Either way the client gets
/// a short-lived token scoped like the one it presented.
async fn token(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
) -> OciResult<Json<JsonValue>> {
    let Some(presented) = req_state.auth.token.get() else {
        return Err(OciError::unauthorized());
    };

    let token = issue_short_lived_token(presented, &state.config.token_hs256_secret)
        .map_err(OciError::from)?;

    Ok(Json(json!({ "token": token, "access_token": token })))
}

/// Validated coordinates of a repository.
pub(crate) struct RepoContext {
    pub space: SpaceName,
    pub repo: RepoName,
    pub permission: SpacePermission,
}

impl RepoContext {
    /// Full name used in session state and responses.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.space.as_str(), self.repo.as_str())
    }
}

/// Validates path coordinates and resolves the caller's permission.
pub(crate) fn repo_context(
    req_state: &RequestState,
    space: &str,
    repo: &str,
) -> OciResult<RepoContext> {
    let space = SpaceName::new(space.to_owned()).map_err(ServerError::from)?;
    let repo = RepoName::new(repo.to_owned()).map_err(ServerError::from)?;

    let permission = req_state.auth.get_permission_for_space(&space);

    Ok(RepoContext {
        space,
        repo,
        permission,
    })
}

/// Authorizes a push and consults the read-only gate.
pub(crate) fn require_push(state: &State, ctx: &RepoContext) -> OciResult<()> {
    ctx.permission.require_push().map_err(ServerError::from)?;
    state.readonly.ensure_writable()?;

    Ok(())
}

/// Resolves the space's default view.
pub(crate) async fn resolve_view(state: &State, ctx: &RepoContext) -> OciResult<ViewModel> {
    let database = state.database().await?;

    let view = crate::database::find_or_create_default_view(
        database,
        ctx.space.as_str(),
        state.config.storage.storage_id(),
    )
    .await?;

    Ok(view)
}

/// Parses a manifest reference: a tag, or a digest when it contains
/// a colon.
pub(crate) fn parse_reference(reference: &str) -> OciResult<ManifestReference> {
    if reference.contains(':') {
        let digest = Digest::from_typed(reference).map_err(ServerError::from)?;
        Ok(ManifestReference::Digest(digest))
    } else {
        let tag = TagName::new(reference.to_owned()).map_err(ServerError::from)?;
        Ok(ManifestReference::Tag(tag.as_str().to_owned()))
    }
}

/// The creator recorded on blobs, defaulting for anonymous pushes.
pub(crate) fn creator(req_state: &RequestState) -> String {
    req_state
        .auth
        .username()
        .unwrap_or("anonymous")
        .to_string()
}

/// `Path` tuple shared by most routes.
pub(crate) type RepoPath = Path<(String, String, String)>;
