//! Server configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use derivative::Derivative;
use serde::{de, Deserialize};
use xdg::BaseDirectories;

use crate::storage::LocalStorageConfig;
use depot_token::HS256Key;

/// Application prefix in XDG base directories.
///
/// This will be concatenated into `$XDG_CONFIG_HOME/depot`.
const XDG_PREFIX: &str = "depot";

/// The server-held HMAC secret.
///
/// The same secret signs access JWTs and resumable-upload state
/// tokens.
#[derive(Clone)]
pub struct ServerKeys {
    /// Key for access tokens.
    pub jwt: HS256Key,

    /// Raw bytes for the upload-state MAC.
    pub raw: Vec<u8>,
}

/// Configuration for the Depot Server.
#[derive(Clone, Derivative, Deserialize)]
#[derivative(Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Socket address to listen on.
    #[serde(default = "default_listen_address")]
    pub listen: SocketAddr,

    /// Allowed `Host` headers.
    ///
    /// This _must_ be configured for production use. If unconfigured or the
    /// list is empty, all `Host` headers are allowed.
    #[serde(rename = "allowed-hosts")]
    #[serde(default = "Vec::new")]
    pub allowed_hosts: Vec<String>,

    /// The canonical API endpoint of this server.
    ///
    /// This is the endpoint baked into Helm index URLs and the
    /// `serverInfo.contextPath` hint. If not configured, the endpoint
    /// is synthesized from the client's `Host` header which may be
    /// insecure.
    ///
    /// The API endpoint _must_ end with a slash (e.g.,
    /// `https://domain.tld/depot/` not `https://domain.tld/depot`).
    #[serde(rename = "api-endpoint")]
    pub api_endpoint: Option<String>,

    /// Database connection.
    pub database: DatabaseConfig,

    /// Storage.
    pub storage: StorageConfig,

    /// Prefix prepended to every content-store path.
    #[serde(rename = "storage-prefix")]
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,

    /// Garbage collection.
    #[serde(rename = "garbage-collection")]
    #[serde(default = "Default::default")]
    pub garbage_collection: GarbageCollectionConfig,

    /// HMAC secret for tokens.
    ///
    /// Set this to the base64 encoding of a randomly generated secret.
    #[serde(rename = "token-hs256-secret-base64")]
    #[serde(deserialize_with = "deserialize_base64_secret")]
    #[derivative(Debug = "ignore")]
    pub token_hs256_secret: ServerKeys,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,

    /// Whether to enable sending of periodic heartbeat queries.
    ///
    /// If enabled, a heartbeat query will be sent every minute.
    #[serde(default = "default_db_heartbeat")]
    pub heartbeat: bool,
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Local file storage.
    #[serde(rename = "local")]
    Local(LocalStorageConfig),
}

impl StorageConfig {
    /// Returns the storage ID recorded on views and blobs.
    pub fn storage_id(&self) -> &str {
        match self {
            Self::Local(_) => "local",
        }
    }
}

/// Garbage collection config.
#[derive(Debug, Clone, Deserialize)]
pub struct GarbageCollectionConfig {
    /// The frequency to run garbage collection at.
    ///
    /// If zero, automatic garbage collection is disabled, but
    /// it can still be run manually with `depotd --mode garbage-collector-once`.
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    pub interval: Duration,

    /// How long soft-deleted rows are retained before the sweep
    /// hard-deletes them.
    #[serde(rename = "retention-period")]
    #[serde(with = "humantime_serde", default = "default_retention_period")]
    pub retention_period: Duration,

    /// How long soft-deleted container tags still count as roots
    /// during the mark phase.
    ///
    /// Zero (default) means deleted tags release their blobs on the
    /// next container GC pass.
    #[serde(rename = "container-retention-period")]
    #[serde(with = "humantime_serde", default = "default_container_retention")]
    pub container_retention_period: Duration,
}

impl Default for GarbageCollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(43200),
            retention_period: default_retention_period(),
            container_retention_period: Duration::ZERO,
        }
    }
}

fn deserialize_base64_secret<'de, D>(deserializer: D) -> Result<ServerKeys, D::Error>
where
    D: de::Deserializer<'de>,
{
    use de::Error;

    let s = String::deserialize(deserializer)?;
    let raw = BASE64_STANDARD.decode(&s).map_err(Error::custom)?;
    let jwt = HS256Key::from_bytes(&raw);

    Ok(ServerKeys { jwt, raw })
}

fn default_listen_address() -> SocketAddr {
    "[::]:8080".parse().unwrap()
}

fn default_db_heartbeat() -> bool {
    false
}

fn default_storage_prefix() -> String {
    "files".to_string()
}

fn default_gc_interval() -> Duration {
    Duration::from_secs(43200)
}

fn default_retention_period() -> Duration {
    Duration::from_secs(86400)
}

fn default_container_retention() -> Duration {
    Duration::ZERO
}

pub fn load_config_from_path(path: &Path) -> Config {
    tracing::info!("Using configurations: {:?}", path);

    let config = std::fs::read_to_string(path).expect("Failed to read configuration file");
    toml::from_str(&config).expect("Invalid configuration file")
}

pub fn load_config_from_str(s: &str) -> Config {
    tracing::info!("Using configurations from environment variable");
    toml::from_str(s).expect("Invalid configuration file")
}

pub fn get_xdg_config_path() -> anyhow::Result<PathBuf> {
    let xdg_dirs = BaseDirectories::with_prefix(XDG_PREFIX)?;
    let config_path = xdg_dirs.place_config_file("server.toml")?;

    Ok(config_path)
}

pub fn get_xdg_data_path() -> anyhow::Result<PathBuf> {
    let xdg_dirs = BaseDirectories::with_prefix(XDG_PREFIX)?;
    let data_path = xdg_dirs.create_data_directory("")?;

    Ok(data_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        let config = load_config_from_str(
            r#"
listen = "[::]:8080"
storage-prefix = "files"
token-hs256-secret-base64 = "c2VjcmV0LXNlY3JldC1zZWNyZXQtc2VjcmV0ISE="

[database]
url = "sqlite://:memory:"

[storage]
type = "local"
root-directory = "/tmp/depot-test"

[garbage-collection]
interval = "12h"
retention-period = "24h"
"#,
        );

        assert!(config.allowed_hosts.is_empty());
        assert_eq!("local", config.storage.storage_id());
        assert_eq!(Duration::from_secs(43200), config.garbage_collection.interval);
        assert_eq!(
            Duration::ZERO,
            config.garbage_collection.container_retention_period
        );

        let StorageConfig::Local(local) = &config.storage;
        assert_eq!(PathBuf::from("/tmp/depot-test"), local.root_directory);
        assert_eq!(100, local.max_threads);
    }
}
