//! Manifest parsing.
//!
//! Manifests come in as raw bytes plus a media type. Parsing is a
//! typed sum of the known manifest shapes, selected through a small
//! open registry so forward-compat media types can be added in one
//! place. Handlers declare their media type at registration; a
//! duplicate registration is a process-wide configuration error.

use std::collections::HashMap;

use anyhow::anyhow;
use serde::Deserialize;

use crate::error::{ServerError, ServerResult};
use depot::digest::Digest;
use depot::mime;

/// A content descriptor referencing a blob or a child manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,

    pub digest: Digest,

    #[serde(default)]
    pub size: i64,
}

/// A single-image manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: i32,

    #[serde(default)]
    pub media_type: Option<String>,

    pub config: Descriptor,

    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// A multi-arch manifest index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: i32,

    #[serde(default)]
    pub media_type: Option<String>,

    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub enum Manifest {
    Image(ImageManifest),
    Index(ImageIndex),
}

impl Manifest {
    /// Returns all descriptors this manifest references directly.
    pub fn references(&self) -> Vec<&Descriptor> {
        match self {
            Self::Image(image) => {
                let mut refs = vec![&image.config];
                refs.extend(image.layers.iter());
                refs
            }
            Self::Index(index) => index.manifests.iter().collect(),
        }
    }

    /// Returns whether this manifest is a list of child manifests.
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

/// Returns whether a media type names a child manifest (as opposed
/// to a config or layer blob).
pub fn is_manifest_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        mime::OCI_MANIFEST | mime::OCI_INDEX | mime::DOCKER_MANIFEST | mime::DOCKER_MANIFEST_LIST
    )
}

type ParseFn = fn(&[u8]) -> ServerResult<Manifest>;

/// The media-type registry.
pub struct ManifestRegistry {
    parsers: HashMap<&'static str, ParseFn>,
}

impl ManifestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Creates a registry with all known media types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(mime::OCI_MANIFEST, parse_image);
        registry.register(mime::DOCKER_MANIFEST, parse_image);
        registry.register(mime::OCI_INDEX, parse_index);
        registry.register(mime::DOCKER_MANIFEST_LIST, parse_index);

        registry
    }

    /// Registers an unmarshal function for a media type.
    ///
    /// Registration happens once at process start; registering the
    /// same media type twice aborts startup.
    pub fn register(&mut self, media_type: &'static str, parse: ParseFn) {
        if self.parsers.insert(media_type, parse).is_some() {
            panic!("Manifest media type {} registered twice", media_type);
        }
    }

    /// Parses manifest bytes according to their media type.
    pub fn parse(&self, media_type: &str, bytes: &[u8]) -> ServerResult<Manifest> {
        let parse = self
            .parsers
            .get(media_type)
            .ok_or_else(|| ServerError::UnsupportedMediaType {
                media_type: media_type.to_owned(),
            })?;

        parse(bytes)
    }
}

impl Default for ManifestRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn parse_image(bytes: &[u8]) -> ServerResult<Manifest> {
    let manifest: ImageManifest = serde_json::from_slice(bytes)
        .map_err(|e| ServerError::InvalidManifest(anyhow!("bad image manifest: {}", e)))?;

    Ok(Manifest::Image(manifest))
}

fn parse_index(bytes: &[u8]) -> ServerResult<Manifest> {
    let index: ImageIndex = serde_json::from_slice(bytes)
        .map_err(|e| ServerError::InvalidManifest(anyhow!("bad manifest index: {}", e)))?;

    Ok(Manifest::Index(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE_MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 7023,
            "digest": "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7"
        },
        "layers": [
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 32654,
                "digest": "sha256:9834876dcfb05cb167a5c24953eba58c4ac89b1adf57f28f2f9d09af107ee8f0"
            },
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 16724,
                "digest": "sha256:3c3a4604a545cdc127456d94e421cd355bca5b528f4a9c1905b15da2eb4a4c6b"
            }
        ]
    }"#;

    const MANIFEST_LIST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
        "manifests": [
            {
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "size": 7143,
                "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f",
                "platform": { "architecture": "ppc64le", "os": "linux" }
            }
        ]
    }"#;

    #[test]
    fn test_parse_image_manifest() {
        let registry = ManifestRegistry::with_defaults();

        let manifest = registry
            .parse(mime::DOCKER_MANIFEST, IMAGE_MANIFEST.as_bytes())
            .unwrap();

        assert!(!manifest.is_index());
        let refs = manifest.references();
        assert_eq!(3, refs.len());
        assert_eq!(
            "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7",
            refs[0].digest.to_string()
        );
    }

    #[test]
    fn test_parse_manifest_list() {
        let registry = ManifestRegistry::with_defaults();

        let manifest = registry
            .parse(mime::DOCKER_MANIFEST_LIST, MANIFEST_LIST.as_bytes())
            .unwrap();

        assert!(manifest.is_index());
        let refs = manifest.references();
        assert_eq!(1, refs.len());
        assert!(is_manifest_media_type(&refs[0].media_type));
    }

    #[test]
    fn test_unknown_media_type() {
        let registry = ManifestRegistry::with_defaults();

        assert!(matches!(
            registry.parse("application/x-unknown", b"{}"),
            Err(ServerError::UnsupportedMediaType { .. })
        ));
    }

    #[test]
    fn test_invalid_manifest() {
        let registry = ManifestRegistry::with_defaults();

        assert!(matches!(
            registry.parse(mime::OCI_MANIFEST, b"not json"),
            Err(ServerError::InvalidManifest(_))
        ));
    }

    #[test]
    #[should_panic]
    fn test_duplicate_registration() {
        let mut registry = ManifestRegistry::with_defaults();
        registry.register(mime::OCI_MANIFEST, parse_image);
    }
}
