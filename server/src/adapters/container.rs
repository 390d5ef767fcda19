//! Container manifest uploads.
//!
//! A manifest push streams the body into a fresh random-ref blob
//! while hashing. Digest-addressed pushes become isolated assets;
//! tag pushes become the tag version's exclusive asset, displacing
//! the previous manifest.

use bytes::Bytes;

use super::bytes_to_blob;
use crate::container::manifest::ManifestRegistry;
use crate::database::entity::asset::AssetKind;
use crate::database::entity::PackageFormat;
use crate::error::{ServerError, ServerResult};
use crate::model::upload::UploadRequest;
use crate::model::{AssetAttr, AssetDescriptor, AssetSpec};
use crate::storage::ContentStore;
use depot::digest::Digest;

/// How the manifest was addressed by the client.
#[derive(Debug, Clone)]
pub enum ManifestReference {
    /// `PUT .../manifests/<tag>` — tag-as-version bookkeeping.
    Tag(String),

    /// `PUT .../manifests/sha256:<hex>` — content-addressed bytes.
    Digest(Digest),
}

/// Serves a manifest body, validates it, and fills in the upload
/// descriptor. Returns the computed digest.
#[allow(clippy::too_many_arguments)]
pub async fn serve(
    upload: &mut UploadRequest,
    store: &ContentStore,
    registry: &ManifestRegistry,
    body: &Bytes,
    media_type: &str,
    space: &str,
    repo: &str,
    reference: &ManifestReference,
    creator: &str,
) -> ServerResult<Digest> {
    // Parse before writing anything so malformed manifests are
    // rejected with their media type's error.
    registry.parse(media_type, body)?;

    let blob = bytes_to_blob(upload, store, body).await?;
    let digest = blob.check_sum.to_digest();

    if let ManifestReference::Digest(given) = reference {
        if *given != digest {
            return Err(ServerError::DigestMismatch {
                expected: given.to_string(),
                actual: digest.to_string(),
            });
        }
    }

    let (attr, name, version) = match reference {
        ManifestReference::Digest(_) => (AssetAttr::Isolated, String::new(), String::new()),
        ManifestReference::Tag(tag) => (AssetAttr::Exclusive, repo.to_owned(), tag.clone()),
    };

    upload.set_descriptor(AssetDescriptor {
        space: space.to_owned(),
        format: PackageFormat::Container,
        attr,
        name,
        namespace: String::new(),
        version,
        version_metadata: serde_json::Value::Null,
        main_asset: AssetSpec {
            path: digest.to_string(),
            kind: AssetKind::Main,
            content_type: media_type.to_owned(),
            check_sum: blob.check_sum,
            metadata: serde_json::Value::Null,
            blob_ref: blob.blob_ref,
            size: blob.size,
        },
        sub_assets: Vec::new(),
        creator: creator.to_owned(),
    });

    Ok(digest)
}
