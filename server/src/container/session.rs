//! Resumable blob upload sessions.
//!
//! A session is identified by a UUID and carries a stable blob ref
//! derived from `(session_uuid, repo_full_name)`, so its partial
//! file survives process restarts. All session state travels through
//! the client as an HMAC-signed token; the running digest is
//! checkpointed into the blob row's metadata after every chunk.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::database::entity::blob::{BlobMetadata, BlobModel, UploadStatus};
use crate::error::{ServerError, ServerResult};
use depot::hash::resumable::ResumableSha256;
use depot::hash::session_ref;

type HmacSha256 = Hmac<Sha256>;

/// Length of the MAC prefix in a packed token.
const MAC_LEN: usize = 32;

/// State of one resumable upload session.
///
/// The whole struct is round-tripped through the client as the
/// `_state` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadState {
    /// Full repository name (`space/repo`).
    pub name: String,

    /// Session UUID.
    pub session_id: Uuid,

    /// Bytes received so far.
    pub offset: u64,

    /// Milliseconds since epoch when the session started.
    pub started_at: i64,

    /// Stable blob ref of the session's partial file.
    #[serde(rename = "ref")]
    pub blob_ref: String,
}

impl UploadState {
    /// Opens a new session.
    pub fn new(repo_full_name: String) -> Self {
        let session_id = Uuid::new_v4();
        let blob_ref = session_ref(&session_id, &repo_full_name);

        Self {
            name: repo_full_name,
            session_id,
            offset: 0,
            started_at: chrono::Utc::now().timestamp_millis(),
            blob_ref,
        }
    }
}

/// Packs an upload state into a signed token.
///
/// Layout: `base64url(mac || json)`.
pub fn pack_upload_state(state: &UploadState, secret: &[u8]) -> String {
    let json = serde_json::to_vec(state).expect("Upload state always serializes");

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&json);
    let tag = mac.finalize().into_bytes();

    let mut packed = Vec::with_capacity(MAC_LEN + json.len());
    packed.extend_from_slice(&tag);
    packed.extend_from_slice(&json);

    BASE64_URL.encode(packed)
}

/// Verifies and unpacks a signed token.
///
/// The MAC comparison is constant-time; any mismatch or malformed
/// token yields the same error.
pub fn unpack_upload_state(token: &str, secret: &[u8]) -> ServerResult<UploadState> {
    let packed = BASE64_URL
        .decode(token)
        .map_err(|_| ServerError::InvalidUploadState)?;

    if packed.len() < MAC_LEN {
        return Err(ServerError::InvalidUploadState);
    }

    let (tag, json) = packed.split_at(MAC_LEN);

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(json);
    mac.verify_slice(tag)
        .map_err(|_| ServerError::InvalidUploadState)?;

    serde_json::from_slice(json).map_err(|_| ServerError::InvalidUploadState)
}

/// Restores the running digest of a session from its blob row.
///
/// A session without a blob row has not started; a blob row without
/// a digester snapshot is a protocol error.
pub fn restore_digester(blob: &BlobModel) -> ServerResult<ResumableSha256> {
    let snapshot = blob
        .metadata
        .0
        .digester
        .as_deref()
        .ok_or(ServerError::InvalidUploadState)?;

    ResumableSha256::from_snapshot(snapshot).map_err(ServerError::from)
}

/// Builds the blob metadata carrying a digest checkpoint.
pub fn checkpoint_metadata(digester: &ResumableSha256, status: UploadStatus) -> BlobMetadata {
    BlobMetadata {
        digester: Some(digester.snapshot()),
        status: Some(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_token_roundtrip() {
        let state = UploadState::new("s1/alpine".to_string());

        let token = pack_upload_state(&state, SECRET);
        let unpacked = unpack_upload_state(&token, SECRET).unwrap();

        assert_eq!(state, unpacked);
    }

    #[test]
    fn test_token_tampering() {
        let state = UploadState::new("s1/alpine".to_string());
        let token = pack_upload_state(&state, SECRET);

        // Flip one byte anywhere in the token
        let raw = BASE64_URL.decode(&token).unwrap();
        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 1;
            let tampered = BASE64_URL.encode(tampered);

            assert!(
                unpack_upload_state(&tampered, SECRET).is_err(),
                "byte {} tamper accepted",
                i
            );
        }

        // Wrong secret
        assert!(unpack_upload_state(&token, b"another-secret").is_err());

        // Garbage
        assert!(unpack_upload_state("%%%", SECRET).is_err());
        assert!(unpack_upload_state("AAAA", SECRET).is_err());
    }

    #[test]
    fn test_session_ref_stability() {
        let state = UploadState::new("s1/alpine".to_string());

        assert_eq!(32, state.blob_ref.len());
        assert_eq!(
            state.blob_ref,
            session_ref(&state.session_id, &state.name),
        );
    }
}
