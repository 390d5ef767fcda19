//! An opaque byte payload in a view's storage.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::Json;

pub type BlobModel = Model;

/// Progress of a resumable upload writing into a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// The session exists but no bytes have arrived.
    NotStarted,

    /// Some chunks have been appended.
    Incomplete,

    /// The digest was confirmed and the blob finalized.
    Completed,
}

/// Blob metadata.
///
/// For blobs created by resumable container uploads this carries the
/// upload status and the base64 snapshot of the running SHA-256
/// hasher; for everything else it is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Base64 snapshot of the running digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digester: Option<String>,

    /// Upload progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UploadStatus>,
}

/// A blob.
///
/// Unique on `(storage_id, blob_ref)`. The ref is a 32-hex opaque
/// key; the on-disk path fans out on its first four characters. A
/// blob is referenced by exactly one asset at a time; replaced blobs
/// are soft-deleted and reclaimed by the soft-remove sweep.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "blob")]
pub struct Model {
    /// Unique numeric ID of the blob.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Identifier of the storage driver holding the bytes.
    #[sea_orm(column_type = "String(StringLen::N(64))")]
    pub storage_id: String,

    /// Opaque 32-hex key of the on-disk file.
    #[sea_orm(column_type = "String(StringLen::N(64))", indexed)]
    pub blob_ref: String,

    /// Size of the payload in bytes.
    pub size: i64,

    /// Blob metadata.
    pub metadata: Json<BlobMetadata>,

    /// Subject that created the blob.
    pub creator: String,

    /// Version for optimistic locking.
    pub version: i32,

    /// Timestamp when the blob is created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp of the soft deletion, if any.
    pub deleted_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::asset::Entity")]
    Asset,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the upload status, treating absence as not started.
    pub fn upload_status(&self) -> UploadStatus {
        self.metadata
            .0
            .status
            .unwrap_or(UploadStatus::NotStarted)
    }
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Asset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
