//! Error handling.

use std::error::Error as StdError;

use anyhow::Error as AnyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use displaydoc::Display;
use serde::Serialize;

use depot::DepotError;

pub type ServerResult<T> = Result<T, ServerError>;

/// HTTP 499, non-standard: the client went away mid-request.
pub const STATUS_CLIENT_CLOSED: u16 = 499;

/// An error.
#[derive(Debug, Display)]
#[ignore_extra_doc_attributes]
pub enum ServerError {
    // Generic responses
    /// The URL you requested was not found.
    NotFound,

    /// Unauthorized.
    Unauthorized,

    /// The server encountered an internal error or misconfiguration.
    InternalServerError,

    // Specialized responses
    /// The requested view does not exist.
    NoSuchView,

    /// The requested package does not exist.
    NoSuchPackage,

    /// The requested version does not exist.
    NoSuchVersion,

    /// The requested asset does not exist.
    NoSuchAsset,

    /// The requested blob does not exist.
    NoSuchBlob,

    /// The requested upload session does not exist.
    NoSuchUploadSession,

    /// Invalid storage path "{path}".
    InvalidPath { path: String },

    /// Storage path "{path}" does not exist.
    PathNotFound { path: String },

    /// The file writer was already finalized.
    WriterFinalized,

    /// Storage file was not changed.
    ///
    /// This is a no-op success: the uploaded payload is byte-identical
    /// to the stored one, so no blob swap takes place.
    FileNotChanged,

    /// The entity was changed by someone else.
    VersionConflict,

    /// The container registry is in read-only maintenance mode.
    ReadOnly,

    /// Invalid upload offset: expected {expected}, got {actual}.
    RangeInvalid { expected: u64, actual: u64 },

    /// Invalid upload state token.
    InvalidUploadState,

    /// Digest mismatch: expected {expected}, got {actual}.
    DigestMismatch { expected: String, actual: String },

    /// Unsupported manifest media type "{media_type}".
    UnsupportedMediaType { media_type: String },

    /// Invalid manifest: {0}
    InvalidManifest(AnyError),

    /// Missing multipart form field "{name}".
    MissingFormField { name: &'static str },

    /// Invalid package payload: {0}
    InvalidPackageContent(AnyError),

    /// The client closed the connection before the upload completed.
    ClientClosed,

    /// Database error: {0}
    DatabaseError(AnyError),

    /// Storage error: {0}
    StorageError(AnyError),

    /// Index serialization error: {0}
    IndexSerializationError(AnyError),

    /// Access error: {0}
    AccessError(depot_token::Error),

    /// General request error: {0}
    RequestError(AnyError),

    /// Error from the common components.
    DepotError(DepotError),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl ServerError {
    pub fn database_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::DatabaseError(AnyError::new(error))
    }

    pub fn storage_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::StorageError(AnyError::new(error))
    }

    pub fn request_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::RequestError(AnyError::new(error))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::InternalServerError => "InternalServerError",

            Self::NoSuchView => "NoSuchView",
            Self::NoSuchPackage => "NoSuchPackage",
            Self::NoSuchVersion => "NoSuchVersion",
            Self::NoSuchAsset => "NoSuchAsset",
            Self::NoSuchBlob => "NoSuchBlob",
            Self::NoSuchUploadSession => "NoSuchUploadSession",
            Self::InvalidPath { .. } => "InvalidPathError",
            Self::PathNotFound { .. } => "PathNotFoundError",
            Self::WriterFinalized => "WriterFinalized",
            Self::FileNotChanged => "ErrStorageFileNotChanged",
            Self::VersionConflict => "ErrVersionConflict",
            Self::ReadOnly => "ReadOnly",
            Self::RangeInvalid { .. } => "RangeInvalid",
            Self::InvalidUploadState => "InvalidUploadState",
            Self::DigestMismatch { .. } => "DigestMismatch",
            Self::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            Self::InvalidManifest(_) => "InvalidManifest",
            Self::MissingFormField { .. } => "ErrMissFormField",
            Self::InvalidPackageContent(_) => "ErrInvalidPackageContent",
            Self::ClientClosed => "ClientClosed",
            Self::DatabaseError(_) => "DatabaseError",
            Self::StorageError(_) => "StorageError",
            Self::IndexSerializationError(_) => "IndexSerializationError",
            Self::AccessError(_) => "AccessError",
            Self::RequestError(_) => "RequestError",
            Self::DepotError(e) => e.name(),
        }
    }

    /// Returns a version of this error for clients.
    fn into_clients(self) -> Self {
        match self {
            Self::AccessError(depot_token::Error::NoDiscoveryPermission) => Self::Unauthorized,

            Self::DatabaseError(_) => Self::InternalServerError,
            Self::StorageError(_) => Self::InternalServerError,
            Self::IndexSerializationError(_) => Self::InternalServerError,

            _ => self,
        }
    }

    pub fn http_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,

            Self::AccessError(_) => StatusCode::FORBIDDEN,
            Self::ReadOnly => StatusCode::FORBIDDEN,

            Self::NoSuchView
            | Self::NoSuchPackage
            | Self::NoSuchVersion
            | Self::NoSuchAsset
            | Self::NoSuchBlob
            | Self::NoSuchUploadSession => StatusCode::NOT_FOUND,
            Self::PathNotFound { .. } => StatusCode::NOT_FOUND,

            Self::VersionConflict => StatusCode::CONFLICT,
            Self::RangeInvalid { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::UnsupportedMediaType { .. } => StatusCode::NOT_IMPLEMENTED,

            Self::ClientClosed => {
                StatusCode::from_u16(STATUS_CLIENT_CLOSED).unwrap_or(StatusCode::BAD_REQUEST)
            }

            Self::InvalidPath { .. }
            | Self::WriterFinalized
            | Self::FileNotChanged
            | Self::InvalidUploadState
            | Self::DigestMismatch { .. }
            | Self::InvalidManifest(_)
            | Self::MissingFormField { .. }
            | Self::InvalidPackageContent(_)
            | Self::RequestError(_)
            | Self::DepotError(_) => StatusCode::BAD_REQUEST,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl StdError for ServerError {}

impl From<DepotError> for ServerError {
    fn from(error: DepotError) -> Self {
        Self::DepotError(error)
    }
}

impl From<depot_token::Error> for ServerError {
    fn from(error: depot_token::Error) -> Self {
        Self::AccessError(error)
    }
}

impl From<sea_orm::DbErr> for ServerError {
    fn from(error: sea_orm::DbErr) -> Self {
        Self::DatabaseError(AnyError::new(error))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if matches!(
            self,
            Self::DatabaseError(_)
                | Self::StorageError(_)
                | Self::IndexSerializationError(_)
                | Self::DepotError(_)
        ) {
            tracing::error!("{:?}", self);
        }

        let sanitized = self.into_clients();

        let status_code = sanitized.http_status_code();
        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: sanitized.to_string(),
            error: sanitized.name().to_string(),
        };

        (status_code, Json(error_response)).into_response()
    }
}
