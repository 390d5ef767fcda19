//! Helm repository index generation.
//!
//! After any chart upload or soft-remove, the view's `index.yaml`
//! meta-asset is rebuilt from the live versions, with each entry's
//! versions in descending semantic-version order.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::DatabaseConnection;
use semver::Version as SemverVersion;
use serde::{Deserialize, Serialize};

use super::bytes_to_blob;
use super::helm::ChartMetadata;
use crate::database::entity::asset::{self, AssetKind, Entity as Asset};
use crate::database::entity::package::{self, Entity as Package};
use crate::database::entity::version::{self, Entity as Version};
use crate::database::entity::view::ViewModel;
use crate::database::entity::PackageFormat;
use crate::error::{ServerError, ServerResult};
use crate::model::upload::UploadRequest;
use crate::model::{AssetAttr, AssetDescriptor, AssetSpec};
use crate::storage::ContentStore;
use depot::mime;
use depot::name::validate_chart_name;

/// Path of the index meta-asset within a view.
pub const INDEX_PATH: &str = "index.yaml";

/// One chart release in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartEntry {
    #[serde(flatten)]
    pub metadata: ChartMetadata,

    pub created: String,

    /// Plain-hex SHA-256 of the chart tarball.
    pub digest: String,

    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Mount point hint for `cm-push`-style clients.
    pub context_path: String,
}

/// A Helm repository index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmIndex {
    pub api_version: String,

    pub generated: String,

    pub entries: BTreeMap<String, Vec<ChartEntry>>,

    pub server_info: ServerInfo,
}

impl HelmIndex {
    /// Creates an empty index for a space.
    pub fn new(space: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            generated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            entries: BTreeMap::new(),
            server_info: ServerInfo {
                context_path: format!("/artifact/{}/helm", space),
            },
        }
    }

    /// Validates and appends one release.
    pub fn must_add(
        &mut self,
        metadata: ChartMetadata,
        path: String,
        base_url: &str,
        digest: String,
    ) -> ServerResult<()> {
        validate_chart_name(&metadata.name)?;
        SemverVersion::parse(&metadata.version).map_err(|_| {
            ServerError::DepotError(depot::DepotError::InvalidPackageVersion {
                version: metadata.version.clone(),
            })
        })?;

        let url = if base_url.is_empty() {
            path
        } else {
            format!("{}/{}", base_url.trim_end_matches('/'), path)
        };

        let name = metadata.name.clone();
        let entry = ChartEntry {
            metadata,
            created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            digest,
            urls: vec![url],
        };

        self.entries.entry(name).or_default().push(entry);

        Ok(())
    }

    /// Sorts each entry's versions descending, newest first.
    pub fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| {
                let a = SemverVersion::parse(&a.metadata.version);
                let b = SemverVersion::parse(&b.metadata.version);

                match (a, b) {
                    (Ok(a), Ok(b)) => b.cmp(&a),
                    _ => std::cmp::Ordering::Equal,
                }
            });
        }
    }

    pub fn to_yaml(&self) -> ServerResult<String> {
        serde_yaml::to_string(self).map_err(|e| ServerError::IndexSerializationError(e.into()))
    }
}

/// Rebuilds and stores the view's index meta-asset.
pub async fn regenerate(
    database: &DatabaseConnection,
    store: &ContentStore,
    view: &ViewModel,
    space: &str,
    creator: &str,
) -> ServerResult<()> {
    let mut index = HelmIndex::new(space);

    let versions = Version::find()
        .find_also_related(Package)
        .filter(version::Column::ViewId.eq(view.id))
        .filter(version::Column::DeletedAt.is_null())
        .filter(package::Column::Space.eq(space))
        .filter(package::Column::Format.eq(PackageFormat::Helm))
        .filter(package::Column::DeletedAt.is_null())
        .all(database)
        .await
        .map_err(ServerError::database_error)?;

    for (version, _package) in versions {
        let main_asset = Asset::find()
            .filter(asset::Column::VersionId.eq(version.id))
            .filter(asset::Column::Kind.eq(AssetKind::Main))
            .filter(asset::Column::DeletedAt.is_null())
            .one(database)
            .await
            .map_err(ServerError::database_error)?;

        let Some(main_asset) = main_asset else {
            continue;
        };

        let metadata: ChartMetadata = match serde_json::from_value(version.metadata.0.clone()) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(version = version.id, "Skipping version with bad metadata: {}", e);
                continue;
            }
        };

        index.must_add(
            metadata,
            main_asset.path.clone(),
            "",
            main_asset.sha256().to_owned(),
        )?;
    }

    index.sort_entries();
    let yaml = index.to_yaml()?;

    let mut request = UploadRequest::new(view.clone());
    let blob = bytes_to_blob(&mut request, store, yaml.as_bytes()).await?;

    request.set_descriptor(AssetDescriptor {
        space: space.to_owned(),
        format: PackageFormat::Helm,
        attr: AssetAttr::Index,
        name: String::new(),
        namespace: String::new(),
        version: String::new(),
        version_metadata: serde_json::Value::Null,
        main_asset: AssetSpec {
            path: INDEX_PATH.to_owned(),
            kind: AssetKind::Main,
            content_type: mime::YAML.to_owned(),
            check_sum: blob.check_sum,
            metadata: serde_json::Value::Null,
            blob_ref: blob.blob_ref,
            size: blob.size,
        },
        sub_assets: Vec::new(),
        creator: creator.to_owned(),
    });

    match request.commit(database).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let _ = request.cancel().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(name: &str, version: &str) -> ChartMetadata {
        ChartMetadata {
            name: name.to_string(),
            version: version.to_string(),
            api_version: Some("v2".to_string()),
            app_version: None,
            description: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_ordering() {
        let mut index = HelmIndex::new("s1");

        index
            .must_add(
                metadata("gitlab", "2022.8.3101"),
                "charts/gitlab-2022.8.3101.tgz".to_string(),
                "",
                "aa".repeat(32),
            )
            .unwrap();
        index
            .must_add(
                metadata("gitlab", "2022.8.3200"),
                "charts/gitlab-2022.8.3200.tgz".to_string(),
                "",
                "bb".repeat(32),
            )
            .unwrap();

        index.sort_entries();

        let gitlab = &index.entries["gitlab"];
        assert_eq!(2, gitlab.len());
        assert_eq!("2022.8.3200", gitlab[0].metadata.version);
        assert_eq!("2022.8.3101", gitlab[1].metadata.version);
        assert_eq!(vec!["charts/gitlab-2022.8.3200.tgz".to_string()], gitlab[0].urls);
    }

    #[test]
    fn test_must_add_validates() {
        let mut index = HelmIndex::new("s1");

        assert!(index
            .must_add(
                metadata("2fauth", "2023.2.801"),
                "charts/2fauth-2023.2.801.tgz".to_string(),
                "",
                "cc".repeat(32),
            )
            .is_err());
        assert!(index.entries.is_empty());
    }

    #[test]
    fn test_yaml_shape() {
        let index = HelmIndex::new("s1");
        let yaml = index.to_yaml().unwrap();

        assert!(yaml.contains("apiVersion: v1"));
        assert!(yaml.contains("contextPath: /artifact/s1/helm"));
        assert!(yaml.contains("generated:"));
    }
}
