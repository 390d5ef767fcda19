//! OCI error envelope.
//!
//! Container endpoints report failures in the error schema of the
//! OCI Distribution Spec: an `errors` array of `{code, message,
//! detail}` records, with the HTTP status derived from the code.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{ServerError, STATUS_CLIENT_CLOSED};
use depot::DepotError;

pub type OciResult<T> = Result<T, OciError>;

/// Error codes of the OCI Distribution Spec, plus the non-standard
/// transport codes the registry emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OciErrorCode {
    BlobUnknown,
    BlobUploadInvalid,
    BlobUploadUnknown,
    DigestInvalid,
    ManifestBlobUnknown,
    ManifestInvalid,
    ManifestUnknown,
    NameInvalid,
    NameUnknown,
    SizeInvalid,
    Unauthorized,
    Denied,
    Unsupported,
    RangeInvalid,
    ClientClosed,
    Unknown,
}

impl OciErrorCode {
    fn http_status_code(&self) -> StatusCode {
        match self {
            Self::BlobUnknown
            | Self::BlobUploadUnknown
            | Self::ManifestBlobUnknown
            | Self::ManifestUnknown
            | Self::NameUnknown => StatusCode::NOT_FOUND,

            Self::BlobUploadInvalid
            | Self::DigestInvalid
            | Self::ManifestInvalid
            | Self::NameInvalid
            | Self::SizeInvalid => StatusCode::BAD_REQUEST,

            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Denied => StatusCode::FORBIDDEN,
            Self::Unsupported => StatusCode::NOT_IMPLEMENTED,
            Self::RangeInvalid => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::ClientClosed => {
                StatusCode::from_u16(STATUS_CLIENT_CLOSED).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An OCI error.
#[derive(Debug)]
pub struct OciError {
    pub code: OciErrorCode,
    pub message: String,
    pub detail: Option<JsonValue>,
}

#[derive(Serialize)]
struct ErrorRecord {
    code: OciErrorCode,
    message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<JsonValue>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorRecord>,
}

impl OciError {
    pub fn new(code: OciErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn blob_unknown(digest: &str) -> Self {
        Self::new(OciErrorCode::BlobUnknown, "blob unknown to registry")
            .with_detail(serde_json::json!({ "digest": digest }))
    }

    pub fn manifest_unknown(reference: &str) -> Self {
        Self::new(OciErrorCode::ManifestUnknown, "manifest unknown")
            .with_detail(serde_json::json!({ "reference": reference }))
    }

    pub fn upload_unknown() -> Self {
        Self::new(
            OciErrorCode::BlobUploadUnknown,
            "blob upload unknown to registry",
        )
    }

    pub fn digest_invalid(message: impl Into<String>) -> Self {
        Self::new(OciErrorCode::DigestInvalid, message)
    }

    pub fn name_invalid(name: &str) -> Self {
        Self::new(OciErrorCode::NameInvalid, "invalid repository name")
            .with_detail(serde_json::json!({ "name": name }))
    }

    pub fn unauthorized() -> Self {
        Self::new(OciErrorCode::Unauthorized, "authentication required")
    }

    pub fn denied() -> Self {
        Self::new(OciErrorCode::Denied, "requested access to the resource is denied")
    }
}

impl From<ServerError> for OciError {
    fn from(error: ServerError) -> Self {
        match &error {
            ServerError::Unauthorized => Self::unauthorized(),
            ServerError::AccessError(_) => Self::denied(),
            ServerError::ReadOnly => Self::new(
                OciErrorCode::Denied,
                "registry is in read-only maintenance mode",
            ),

            ServerError::RangeInvalid { expected, actual } => {
                Self::new(OciErrorCode::RangeInvalid, "invalid content range").with_detail(
                    serde_json::json!({ "expected": expected, "actual": actual }),
                )
            }
            ServerError::ClientClosed => {
                Self::new(OciErrorCode::ClientClosed, "client closed the connection")
            }

            ServerError::InvalidUploadState => {
                Self::new(OciErrorCode::BlobUploadInvalid, "incorrect state")
            }
            ServerError::NoSuchUploadSession => Self::upload_unknown(),

            ServerError::DigestMismatch { expected, actual } => {
                Self::digest_invalid(format!("expected {}, got {}", expected, actual))
            }

            ServerError::InvalidManifest(e) => {
                Self::new(OciErrorCode::ManifestInvalid, e.to_string())
            }
            ServerError::UnsupportedMediaType { media_type } => Self::new(
                OciErrorCode::Unsupported,
                format!("unsupported manifest media type {}", media_type),
            ),

            ServerError::DepotError(
                DepotError::InvalidRepoName { name } | DepotError::InvalidSpaceName { name },
            ) => Self::name_invalid(name),
            ServerError::DepotError(DepotError::InvalidTagName { name }) => {
                Self::new(OciErrorCode::ManifestInvalid, format!("invalid tag {}", name))
            }
            ServerError::DepotError(DepotError::InvalidDigest { digest, reason }) => {
                Self::digest_invalid(format!("invalid digest {}: {}", digest, reason))
            }

            ServerError::NoSuchBlob | ServerError::PathNotFound { .. } => {
                Self::new(OciErrorCode::BlobUnknown, "blob unknown to registry")
            }
            ServerError::NoSuchPackage
            | ServerError::NoSuchVersion
            | ServerError::NoSuchAsset
            | ServerError::NoSuchView
            | ServerError::NotFound => {
                Self::new(OciErrorCode::ManifestUnknown, "manifest unknown")
            }

            _ => {
                tracing::error!("{:?}", error);
                Self::new(OciErrorCode::Unknown, "internal error")
            }
        }
    }
}

impl IntoResponse for OciError {
    fn into_response(self) -> Response {
        let status = self.code.http_status_code();

        let envelope = ErrorEnvelope {
            errors: vec![ErrorRecord {
                code: self.code,
                message: self.message,
                detail: self.detail,
            }],
        };

        let mut response = (status, Json(envelope)).into_response();

        // Drive clients into the token flow
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                r#"Bearer realm="/v2/token",service="depot-registry""#
                    .parse()
                    .unwrap(),
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serialization() {
        assert_eq!(
            "\"BLOB_UPLOAD_INVALID\"",
            serde_json::to_string(&OciErrorCode::BlobUploadInvalid).unwrap()
        );
        assert_eq!(
            "\"RANGE_INVALID\"",
            serde_json::to_string(&OciErrorCode::RangeInvalid).unwrap()
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            StatusCode::RANGE_NOT_SATISFIABLE,
            OciErrorCode::RangeInvalid.http_status_code()
        );
        assert_eq!(499, OciErrorCode::ClientClosed.http_status_code().as_u16());
        assert_eq!(
            StatusCode::NOT_IMPLEMENTED,
            OciErrorCode::Unsupported.http_status_code()
        );
    }

    #[test]
    fn test_from_server_error() {
        let error = OciError::from(ServerError::InvalidUploadState);
        assert_eq!(OciErrorCode::BlobUploadInvalid, error.code);
        assert_eq!("incorrect state", error.message);

        let error = OciError::from(ServerError::ReadOnly);
        assert_eq!(OciErrorCode::Denied, error.code);
    }
}
