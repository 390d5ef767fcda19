//! Raw file uploads.
//!
//! Multipart form with fields `{name, version, group?, file}`. The
//! uploaded filename becomes the asset path.

use axum::extract::Multipart;
use futures::TryStreamExt;
use serde_json::Value as JsonValue;
use tokio_util::io::StreamReader;

use super::stream_to_blob;
use crate::database::entity::asset::AssetKind;
use crate::database::entity::PackageFormat;
use crate::error::{ServerError, ServerResult};
use crate::model::upload::UploadRequest;
use crate::model::{AssetAttr, AssetDescriptor, AssetSpec};
use crate::storage::ContentStore;
use depot::mime;
use depot::name::{validate_group_name, validate_package_name, validate_package_version};

/// Reads the multipart body and fills in the upload descriptor.
pub async fn serve(
    upload: &mut UploadRequest,
    store: &ContentStore,
    multipart: &mut Multipart,
    space: &str,
    creator: &str,
) -> ServerResult<()> {
    let mut name = None;
    let mut group = None;
    let mut version = None;
    let mut payload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ServerError::request_error)?
    {
        match field.name() {
            Some("name") => {
                name = Some(field.text().await.map_err(ServerError::request_error)?);
            }
            Some("group") => {
                group = Some(field.text().await.map_err(ServerError::request_error)?);
            }
            Some("version") => {
                version = Some(field.text().await.map_err(ServerError::request_error)?);
            }
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or(ServerError::MissingFormField { name: "file" })?;
                let content_type = field
                    .content_type()
                    .map(str::to_owned)
                    .unwrap_or_else(|| mime::OCTET_STREAM.to_owned());

                let stream = field.map_err(std::io::Error::other);
                let mut reader = StreamReader::new(stream);

                let blob = stream_to_blob(upload, store, &mut reader).await?;

                payload = Some((file_name, content_type, blob));
            }
            _ => {}
        }
    }

    let name = name.ok_or(ServerError::MissingFormField { name: "name" })?;
    let version = version.ok_or(ServerError::MissingFormField { name: "version" })?;
    let (file_name, content_type, blob) =
        payload.ok_or(ServerError::MissingFormField { name: "file" })?;

    upload.set_descriptor(AssetDescriptor {
        space: space.to_owned(),
        format: PackageFormat::Raw,
        attr: AssetAttr::Normal,
        name,
        namespace: group.unwrap_or_default(),
        version,
        version_metadata: JsonValue::Null,
        main_asset: AssetSpec {
            path: file_name,
            kind: AssetKind::Main,
            content_type,
            check_sum: blob.check_sum,
            metadata: JsonValue::Null,
            blob_ref: blob.blob_ref,
            size: blob.size,
        },
        sub_assets: Vec::new(),
        creator: creator.to_owned(),
    });

    Ok(())
}

/// Validates the served descriptor.
pub fn is_valid(descriptor: &AssetDescriptor) -> ServerResult<()> {
    validate_package_name(&descriptor.name)?;
    validate_package_version(&descriptor.version)?;
    validate_group_name(&descriptor.namespace)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use depot::hash::MultiHasher;

    fn descriptor(name: &str, version: &str, group: &str) -> AssetDescriptor {
        let mut hasher = MultiHasher::new();
        hasher.update(b"payload");

        AssetDescriptor {
            space: "s1".to_string(),
            format: PackageFormat::Raw,
            attr: AssetAttr::Normal,
            name: name.to_string(),
            namespace: group.to_string(),
            version: version.to_string(),
            version_metadata: JsonValue::Null,
            main_asset: AssetSpec {
                path: "install.sh".to_string(),
                kind: AssetKind::Main,
                content_type: mime::OCTET_STREAM.to_string(),
                check_sum: hasher.sum(),
                metadata: JsonValue::Null,
                blob_ref: "0123456789abcdef0123456789abcdef".to_string(),
                size: 7,
            },
            sub_assets: Vec::new(),
            creator: "tester".to_string(),
        }
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid(&descriptor("gitfox", "1.0.0", "easycorp.pangu")).is_ok());
        assert!(is_valid(&descriptor("gitfox", "1.0.0", "")).is_ok());

        assert!(is_valid(&descriptor(".gitfox", "1.0.0", "")).is_err());
        assert!(is_valid(&descriptor("gitfox", "1.0.0.", "")).is_err());
        assert!(is_valid(&descriptor("gitfox", "1.0.0", "easycorp..pangu")).is_err());
    }
}
