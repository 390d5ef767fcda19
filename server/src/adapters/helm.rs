//! Helm chart uploads.
//!
//! Multipart form with a single `chart` field holding the chart
//! tarball. The tarball's `Chart.yaml` decides the package
//! coordinates.

use std::collections::BTreeMap;
use std::io::Read;

use anyhow::anyhow;
use axum::extract::Multipart;
use flate2::read::GzDecoder;
use semver::Version as SemverVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tar::Archive;

use super::bytes_to_blob;
use crate::database::entity::asset::AssetKind;
use crate::database::entity::PackageFormat;
use crate::error::{ServerError, ServerResult};
use crate::model::upload::UploadRequest;
use crate::model::{AssetAttr, AssetDescriptor, AssetSpec};
use crate::storage::ContentStore;
use depot::mime;
use depot::name::validate_chart_name;

/// Metadata from a chart's `Chart.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Everything else from `Chart.yaml`, passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl ChartMetadata {
    /// The canonical path of the chart asset.
    pub fn asset_path(&self) -> String {
        format!("charts/{}-{}.tgz", self.name, self.version)
    }
}

/// Reads the multipart body and fills in the upload descriptor.
pub async fn serve(
    upload: &mut UploadRequest,
    store: &ContentStore,
    multipart: &mut Multipart,
    space: &str,
    creator: &str,
) -> ServerResult<()> {
    let mut chart = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ServerError::request_error)?
    {
        if field.name() == Some("chart") {
            chart = Some(field.bytes().await.map_err(ServerError::request_error)?);
        }
    }

    let chart = chart.ok_or(ServerError::MissingFormField { name: "chart" })?;

    let metadata = parse_chart_metadata(&chart)?;
    let blob = bytes_to_blob(upload, store, &chart).await?;

    let metadata_json =
        serde_json::to_value(&metadata).map_err(|e| ServerError::InvalidPackageContent(e.into()))?;

    upload.set_descriptor(AssetDescriptor {
        space: space.to_owned(),
        format: PackageFormat::Helm,
        attr: AssetAttr::Normal,
        name: metadata.name.clone(),
        namespace: String::new(),
        version: metadata.version.clone(),
        version_metadata: metadata_json.clone(),
        main_asset: AssetSpec {
            path: metadata.asset_path(),
            kind: AssetKind::Main,
            content_type: mime::CHART_TGZ.to_owned(),
            check_sum: blob.check_sum,
            metadata: metadata_json,
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
    validate_chart_name(&descriptor.name)?;

    SemverVersion::parse(&descriptor.version).map_err(|_| {
        ServerError::DepotError(depot::DepotError::InvalidPackageVersion {
            version: descriptor.version.clone(),
        })
    })?;

    Ok(())
}

/// Extracts `Chart.yaml` from a chart tarball.
pub fn parse_chart_metadata(tarball: &[u8]) -> ServerResult<ChartMetadata> {
    let decoder = GzDecoder::new(tarball);
    let mut archive = Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|e| ServerError::InvalidPackageContent(anyhow!("bad chart tarball: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| ServerError::InvalidPackageContent(anyhow!("bad chart tarball: {}", e)))?;

        let path = entry
            .path()
            .map_err(|e| ServerError::InvalidPackageContent(anyhow!("bad chart entry: {}", e)))?;

        // Charts nest everything under "<name>/"; the metadata is
        // always at "<name>/Chart.yaml".
        let is_chart_yaml = path.components().count() == 2
            && path.file_name().map(|f| f == "Chart.yaml").unwrap_or(false);

        if !is_chart_yaml {
            continue;
        }

        let mut yaml = Vec::new();
        entry
            .read_to_end(&mut yaml)
            .map_err(|e| ServerError::InvalidPackageContent(anyhow!("bad Chart.yaml: {}", e)))?;

        return serde_yaml::from_slice(&yaml)
            .map_err(|e| ServerError::InvalidPackageContent(anyhow!("bad Chart.yaml: {}", e)));
    }

    Err(ServerError::InvalidPackageContent(anyhow!(
        "chart tarball has no Chart.yaml"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    pub(crate) fn chart_tarball(name: &str, version: &str) -> Vec<u8> {
        let yaml = format!(
            "apiVersion: v2\nname: {}\nversion: {}\ndescription: A test chart\n",
            name, version
        );

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut header = tar::Header::new_gnu();
        header.set_size(yaml.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("{}/Chart.yaml", name),
                yaml.as_bytes(),
            )
            .unwrap();

        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_parse_chart_metadata() {
        let tarball = chart_tarball("gitlab", "2022.8.3101");

        let metadata = parse_chart_metadata(&tarball).unwrap();
        assert_eq!("gitlab", metadata.name);
        assert_eq!("2022.8.3101", metadata.version);
        assert_eq!("charts/gitlab-2022.8.3101.tgz", metadata.asset_path());
        assert_eq!(Some("v2".to_string()), metadata.api_version);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_chart_metadata(b"not a tarball").is_err());
    }

    #[test]
    fn test_is_valid() {
        let metadata = parse_chart_metadata(&chart_tarball("gitlab", "2022.8.3101")).unwrap();

        let descriptor = AssetDescriptor {
            space: "s1".to_string(),
            format: PackageFormat::Helm,
            attr: AssetAttr::Normal,
            name: metadata.name.clone(),
            namespace: String::new(),
            version: metadata.version.clone(),
            version_metadata: JsonValue::Null,
            main_asset: AssetSpec {
                path: metadata.asset_path(),
                kind: AssetKind::Main,
                content_type: mime::CHART_TGZ.to_string(),
                check_sum: {
                    let mut hasher = depot::hash::MultiHasher::new();
                    hasher.update(b"x");
                    hasher.sum()
                },
                metadata: JsonValue::Null,
                blob_ref: "0123456789abcdef0123456789abcdef".to_string(),
                size: 1,
            },
            sub_assets: Vec::new(),
            creator: "tester".to_string(),
        };

        assert!(is_valid(&descriptor).is_ok());

        // Names starting with a digit are rejected
        let mut bad = descriptor.clone();
        bad.name = "2fauth".to_string();
        assert!(is_valid(&bad).is_err());

        let mut bad = descriptor;
        bad.version = "not-semver".to_string();
        assert!(is_valid(&bad).is_err());
    }
}
