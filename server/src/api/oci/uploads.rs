//! Resumable blob upload endpoints.
//!
//! The session state machine: `POST` opens a session (or performs a
//! monolithic upload when `?digest=` is given), `PATCH` appends a
//! chunk, `PUT` appends any final bytes and finalizes against the
//! supplied digest, `DELETE` cancels. All session state rides in the
//! HMAC-signed `_state` token; the running digest is checkpointed in
//! the blob row between requests.

use std::io;

use axum::{
    body::Body,
    extract::{Extension, Path, Query, Request},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use futures::TryStreamExt;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, TransactionTrait};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::instrument;
use uuid::Uuid;

use super::error::{OciError, OciErrorCode, OciResult};
use super::{creator, repo_context, require_push, resolve_view, RepoContext};
use crate::container::session::{
    checkpoint_metadata, pack_upload_state, restore_digester, unpack_upload_state, UploadState,
};
use crate::database::entity::asset::{self, AssetKind, Entity as Asset};
use crate::database::entity::blob::{self, BlobModel, Entity as Blob, UploadStatus};
use crate::database::entity::view::ViewModel;
use crate::database::entity::{Json as DbJson, PackageFormat};
use crate::database::{
    find_asset_isolated, find_blob_by_ref, update_blob_opt_lock,
};
use crate::error::{ServerError, ServerResult};
use crate::storage::store::blob_path;
use crate::{RequestState, State};
use depot::digest::Digest;
use depot::hash::resumable::ResumableSha256;
use depot::hash::ChecksumSet;

/// Read buffer size for chunk appends.
const APPEND_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub(crate) struct UploadQuery {
    #[serde(rename = "_state")]
    state: Option<String>,

    digest: Option<String>,
}

/// Starts an upload session, or performs a monolithic upload when a
/// digest is supplied.
#[instrument(skip_all, fields(space, repo))]
pub(crate) async fn start_upload(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> OciResult<Response> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    require_push(&state, &ctx)?;

    let view = resolve_view(&state, &ctx).await?;
    let mut upload_state = UploadState::new(ctx.full_name());
    let creator = creator(&req_state);

    if let Some(digest) = &query.digest {
        // Monolithic upload: whole body in one POST
        let digest =
            Digest::from_typed(digest).map_err(|e| OciError::digest_invalid(e.to_string()))?;

        append_to_session(
            &state,
            &view,
            &mut upload_state,
            request.into_body(),
            Some(0),
            None,
            &creator,
        )
        .await?;
        finalize_session(&state, &view, &upload_state, &digest).await?;

        return Ok(Response::builder()
            .status(StatusCode::CREATED)
            .header(
                header::LOCATION,
                format!("/v2/{}/blobs/{}", upload_state.name, digest),
            )
            .header("Docker-Content-Digest", digest.to_string())
            .header(header::CONTENT_LENGTH, 0)
            .body(Body::empty())
            .unwrap());
    }

    let token = pack_upload_state(&upload_state, &state.config.token_hs256_secret.raw);

    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(header::LOCATION, upload_location(&upload_state, &token))
        .header("Docker-Upload-UUID", upload_state.session_id.to_string())
        .header(header::RANGE, range_header(0))
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap())
}

/// Reports the current offset of a session.
#[instrument(skip_all, fields(space, repo, session))]
pub(crate) async fn get_upload_status(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo, session)): Path<(String, String, String)>,
    Query(query): Query<UploadQuery>,
) -> OciResult<Response> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    let mut upload_state = session_state(&state, &ctx, &session, &query)?;

    let offset = current_offset(&state, &upload_state).await?;
    upload_state.offset = offset;

    let token = pack_upload_state(&upload_state, &state.config.token_hs256_secret.raw);

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::LOCATION, upload_location(&upload_state, &token))
        .header("Docker-Upload-UUID", upload_state.session_id.to_string())
        .header(header::RANGE, range_header(offset))
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap())
}

/// Appends a chunk.
#[instrument(skip_all, fields(space, repo, session))]
pub(crate) async fn patch_upload(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo, session)): Path<(String, String, String)>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    request: Request,
) -> OciResult<Response> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    require_push(&state, &ctx)?;

    let mut upload_state = session_state(&state, &ctx, &session, &query)?;
    let view = resolve_view(&state, &ctx).await?;
    let creator = creator(&req_state);

    let content_range = parse_content_range(&headers)?;
    let declared_len = parse_content_length(&headers)?;

    if let (Some((start, end)), Some(len)) = (content_range, declared_len) {
        if end - start + 1 != len {
            return Err(OciError::new(
                OciErrorCode::SizeInvalid,
                "content length does not match content range",
            ));
        }
    }

    append_to_session(
        &state,
        &view,
        &mut upload_state,
        request.into_body(),
        content_range.map(|(start, _)| start),
        declared_len,
        &creator,
    )
    .await?;

    let token = pack_upload_state(&upload_state, &state.config.token_hs256_secret.raw);

    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(header::LOCATION, upload_location(&upload_state, &token))
        .header("Docker-Upload-UUID", upload_state.session_id.to_string())
        .header(header::RANGE, range_header(upload_state.offset))
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap())
}

/// Appends any final bytes and finalizes the blob.
#[instrument(skip_all, fields(space, repo, session))]
pub(crate) async fn put_upload(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo, session)): Path<(String, String, String)>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    request: Request,
) -> OciResult<Response> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    require_push(&state, &ctx)?;

    let digest = query
        .digest
        .as_deref()
        .ok_or_else(|| OciError::digest_invalid("digest parameter missing"))?;
    let digest = Digest::from_typed(digest).map_err(|e| OciError::digest_invalid(e.to_string()))?;

    let mut upload_state = session_state(&state, &ctx, &session, &query)?;
    let view = resolve_view(&state, &ctx).await?;
    let creator = creator(&req_state);

    let declared_len = parse_content_length(&headers)?;
    if declared_len != Some(0) {
        append_to_session(
            &state,
            &view,
            &mut upload_state,
            request.into_body(),
            None,
            declared_len,
            &creator,
        )
        .await?;
    }

    finalize_session(&state, &view, &upload_state, &digest).await?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(
            header::LOCATION,
            format!("/v2/{}/blobs/{}", upload_state.name, digest),
        )
        .header("Docker-Content-Digest", digest.to_string())
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap())
}

/// Cancels a session.
///
/// The partial file is removed; the blob row and its in-flight
/// metadata are soft-deleted and reclaimed by the soft-remove sweep
/// after retention.
#[instrument(skip_all, fields(space, repo, session))]
pub(crate) async fn delete_upload(
    Extension(state): Extension<State>,
    Extension(req_state): Extension<RequestState>,
    Path((space, repo, session)): Path<(String, String, String)>,
    Query(query): Query<UploadQuery>,
) -> OciResult<StatusCode> {
    let ctx = repo_context(&req_state, &space, &repo)?;
    let upload_state = session_state(&state, &ctx, &session, &query)?;

    let store = state.store().await?;
    match store.delete(&blob_path(&upload_state.blob_ref)).await {
        Ok(()) | Err(ServerError::PathNotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let database = state.database().await?;
    let view = resolve_view(&state, &ctx).await?;

    if let Some(blob) = find_blob_by_ref(database, &view.storage_id, &upload_state.blob_ref).await?
    {
        let now = chrono::Utc::now();
        update_blob_opt_lock(database, blob.id, |_current, change| {
            change.deleted_at = Set(Some(now));
        })
        .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Unpacks and cross-checks the `_state` token.
fn session_state(
    state: &State,
    ctx: &RepoContext,
    session: &str,
    query: &UploadQuery,
) -> OciResult<UploadState> {
    let token = query
        .state
        .as_deref()
        .ok_or_else(|| OciError::new(OciErrorCode::BlobUploadInvalid, "incorrect state"))?;

    let upload_state = unpack_upload_state(token, &state.config.token_hs256_secret.raw)?;

    let session: Uuid = session.parse().map_err(|_| OciError::upload_unknown())?;

    if upload_state.session_id != session || upload_state.name != ctx.full_name() {
        return Err(OciError::upload_unknown());
    }

    Ok(upload_state)
}

/// Returns the byte count of the session's partial file.
async fn current_offset(state: &State, upload_state: &UploadState) -> OciResult<u64> {
    let store = state.store().await?;

    match store.stat(&blob_path(&upload_state.blob_ref)).await {
        Ok(info) => Ok(info.size),
        Err(ServerError::PathNotFound { .. }) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Appends a request body to the session's partial file, updating
/// the checkpointed digest.
async fn append_to_session(
    state: &State,
    view: &ViewModel,
    upload_state: &mut UploadState,
    body: Body,
    expected_start: Option<u64>,
    declared_len: Option<u64>,
    creator: &str,
) -> OciResult<()> {
    let store = state.store().await?;
    let database = state.database().await?;

    let mut writer = store.writer(&blob_path(&upload_state.blob_ref), true).await?;
    let current = writer.size();

    if let Some(start) = expected_start {
        if start != current {
            let _ = writer.close().await;
            return Err(ServerError::RangeInvalid {
                expected: current,
                actual: start,
            }
            .into());
        }
    }

    // Restore the running digest; a fresh session starts a fresh
    // hasher. A blob row without upload metadata is a protocol
    // error.
    let existing = find_blob_by_ref(database, &view.storage_id, &upload_state.blob_ref).await?;
    let mut digester = match &existing {
        Some(blob) => match blob.upload_status() {
            UploadStatus::NotStarted => {
                let _ = writer.close().await;
                return Err(ServerError::InvalidUploadState.into());
            }
            _ => restore_digester(blob)?,
        },
        None => ResumableSha256::new(),
    };

    if digester.bytes_written() != current {
        // A previous append failed mid-chunk; the session cannot be
        // resumed consistently.
        let _ = writer.close().await;
        return Err(ServerError::InvalidUploadState.into());
    }

    let stream = body.into_data_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(stream);

    let mut buf = vec![0u8; APPEND_BUFFER_SIZE];
    let mut appended = 0u64;

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(read) => read,
            Err(e) => {
                tracing::debug!("Client went away mid-chunk: {}", e);
                let _ = writer.close().await;
                return Err(ServerError::ClientClosed.into());
            }
        };

        if read == 0 {
            break;
        }

        if let Err(e) = writer.write(&buf[..read]).await {
            let _ = writer.close().await;
            return Err(e.into());
        }
        digester.update(&buf[..read]);
        appended += read as u64;
    }

    if let Some(len) = declared_len {
        if appended != len {
            let _ = writer.cancel().await;
            let _ = writer.close().await;
            return Err(OciError::new(
                OciErrorCode::SizeInvalid,
                "content length does not match payload",
            ));
        }
    }

    writer.commit().await.map_err(ServerError::from)?;
    writer.close().await.map_err(ServerError::from)?;

    let size = (current + appended) as i64;
    upsert_session_blob(
        database,
        view,
        upload_state,
        &digester,
        UploadStatus::Incomplete,
        size,
        creator,
    )
    .await?;

    upload_state.offset = current + appended;

    Ok(())
}

/// Confirms the digest and binds the blob to a content-addressed
/// asset.
async fn finalize_session(
    state: &State,
    view: &ViewModel,
    upload_state: &UploadState,
    digest: &Digest,
) -> OciResult<()> {
    let database = state.database().await?;

    let blob = find_blob_by_ref(database, &view.storage_id, &upload_state.blob_ref)
        .await?
        .ok_or(ServerError::NoSuchUploadSession)?;

    let digester = restore_digester(&blob)?;
    let size = digester.bytes_written() as i64;

    let computed = digester.clone().finalize();
    if computed != *digest {
        return Err(ServerError::DigestMismatch {
            expected: digest.to_string(),
            actual: computed.to_string(),
        }
        .into());
    }

    let digest_str = digest.to_string();

    let txn = database
        .begin()
        .await
        .map_err(ServerError::database_error)?;

    update_blob_opt_lock(&txn, blob.id, |_current, change| {
        change.metadata = Set(DbJson(checkpoint_metadata(&digester, UploadStatus::Completed)));
        change.size = Set(size);
    })
    .await?;

    let now = chrono::Utc::now();
    let check_sum = ChecksumSet {
        md5: String::new(),
        sha1: String::new(),
        sha256: computed.to_hex(),
        sha512: String::new(),
    };

    match find_asset_isolated(&txn, &digest_str, PackageFormat::Container).await? {
        Some(existing) if existing.blob_id == blob.id => {}
        Some(existing) => {
            // Replaced payload: swap the blob in and retire the old
            // one
            let previous = existing.blob_id;

            Asset::update(asset::ActiveModel {
                id: Set(existing.id),
                blob_id: Set(blob.id),
                check_sum: Set(DbJson(check_sum)),
                updated_at: Set(now),
                ..Default::default()
            })
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;

            update_blob_opt_lock(&txn, previous, |_current, change| {
                change.deleted_at = Set(Some(now));
            })
            .await?;
        }
        None => {
            Asset::insert(asset::ActiveModel {
                version_id: Set(None),
                view_id: Set(Some(view.id)),
                path: Set(digest_str.clone()),
                format: Set(PackageFormat::Container),
                kind: Set(AssetKind::Main),
                content_type: Set(depot::mime::OCTET_STREAM.to_owned()),
                blob_id: Set(blob.id),
                check_sum: Set(DbJson(check_sum)),
                metadata: Set(DbJson(serde_json::Value::Null)),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
                ..Default::default()
            })
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;
        }
    }

    txn.commit().await.map_err(ServerError::database_error)?;

    Ok(())
}

/// Creates or checkpoints the session's blob row.
async fn upsert_session_blob<C: ConnectionTrait>(
    conn: &C,
    view: &ViewModel,
    upload_state: &UploadState,
    digester: &ResumableSha256,
    status: UploadStatus,
    size: i64,
    creator: &str,
) -> ServerResult<BlobModel> {
    match find_blob_by_ref(conn, &view.storage_id, &upload_state.blob_ref).await? {
        Some(existing) => {
            update_blob_opt_lock(conn, existing.id, |_current, change| {
                change.metadata = Set(DbJson(checkpoint_metadata(digester, status)));
                change.size = Set(size);
            })
            .await
        }
        None => {
            let insertion = Blob::insert(blob::ActiveModel {
                storage_id: Set(view.storage_id.clone()),
                blob_ref: Set(upload_state.blob_ref.clone()),
                size: Set(size),
                metadata: Set(DbJson(checkpoint_metadata(digester, status))),
                creator: Set(creator.to_owned()),
                version: Set(0),
                created_at: Set(chrono::Utc::now()),
                deleted_at: Set(None),
                ..Default::default()
            })
            .exec(conn)
            .await
            .map_err(ServerError::database_error)?;

            Blob::find_by_id(insertion.last_insert_id)
                .one(conn)
                .await
                .map_err(ServerError::database_error)?
                .ok_or(ServerError::NoSuchBlob)
        }
    }
}

fn upload_location(upload_state: &UploadState, token: &str) -> String {
    format!(
        "/v2/{}/blobs/uploads/{}?_state={}",
        upload_state.name, upload_state.session_id, token
    )
}

/// `Range` header of the current session: `0-<size-1>`, or `0-0`
/// when empty.
fn range_header(offset: u64) -> String {
    format!("0-{}", offset.saturating_sub(1))
}

/// Parses `Content-Range: <start>-<end>`.
fn parse_content_range(headers: &HeaderMap) -> OciResult<Option<(u64, u64)>> {
    let Some(value) = headers.get(header::CONTENT_RANGE) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| OciError::new(OciErrorCode::RangeInvalid, "invalid content range"))?;

    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| OciError::new(OciErrorCode::RangeInvalid, "invalid content range"))?;

    let start: u64 = start
        .trim()
        .parse()
        .map_err(|_| OciError::new(OciErrorCode::RangeInvalid, "invalid content range"))?;
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|_| OciError::new(OciErrorCode::RangeInvalid, "invalid content range"))?;

    if end < start {
        return Err(OciError::new(
            OciErrorCode::RangeInvalid,
            "invalid content range",
        ));
    }

    Ok(Some((start, end)))
}

fn parse_content_length(headers: &HeaderMap) -> OciResult<Option<u64>> {
    let Some(value) = headers.get(header::CONTENT_LENGTH) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Some)
        .ok_or_else(|| OciError::new(OciErrorCode::SizeInvalid, "invalid content length"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header() {
        assert_eq!("0-0", range_header(0));
        assert_eq!("0-511", range_header(512));
        assert_eq!("0-1023", range_header(1024));
    }

    #[test]
    fn test_parse_content_range() {
        let mut headers = HeaderMap::new();
        assert_eq!(None, parse_content_range(&headers).unwrap());

        headers.insert(header::CONTENT_RANGE, "0-511".parse().unwrap());
        assert_eq!(Some((0, 511)), parse_content_range(&headers).unwrap());

        headers.insert(header::CONTENT_RANGE, "512-1023".parse().unwrap());
        assert_eq!(Some((512, 1023)), parse_content_range(&headers).unwrap());

        headers.insert(header::CONTENT_RANGE, "600-500".parse().unwrap());
        assert!(parse_content_range(&headers).is_err());

        headers.insert(header::CONTENT_RANGE, "garbage".parse().unwrap());
        assert!(parse_content_range(&headers).is_err());
    }
}
