//! MIME types.

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Helm chart tarball.
pub const CHART_TGZ: &str = "application/x-compressed-tar";

/// Helm repository index.
pub const YAML: &str = "application/x-yaml";

/// Fallback for raw payloads.
pub const OCTET_STREAM: &str = "application/octet-stream";
