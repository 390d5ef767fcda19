//! Blob file storage.
//!
//! The driver is a directory-shaped byte store. Only the local
//! filesystem backend exists today; the capability set is kept narrow
//! so another backend can be slotted in behind the same seam.

mod local;
mod regulator;
pub mod store;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::AsyncRead;

use crate::error::{ServerError, ServerResult};

pub(crate) use self::local::{LocalBackend, LocalStorageConfig};
pub(crate) use self::regulator::Regulator;
pub(crate) use self::store::ContentStore;

lazy_static! {
    static ref PATH_SEGMENT_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap();
}

/// Metadata of a stored file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path of the file, relative to the driver root.
    pub path: String,

    /// Size in bytes. Zero for directories.
    pub size: u64,

    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// A streaming writer into the store.
///
/// A writer must be finalized with exactly one of `commit` or
/// `cancel`, then dropped via `close`. Any further transition fails
/// with [`ServerError::WriterFinalized`].
#[async_trait::async_trait]
pub trait FileWriter: Send + Sync {
    /// Number of bytes in the file, including pre-existing bytes
    /// when the writer was opened in append mode.
    fn size(&self) -> u64;

    /// Appends bytes to the file.
    async fn write(&mut self, buf: &[u8]) -> ServerResult<()>;

    /// Flushes and fsyncs the file, keeping it.
    async fn commit(&mut self) -> ServerResult<()>;

    /// Removes the partial file.
    async fn cancel(&mut self) -> ServerResult<()>;

    /// Releases the file handle.
    async fn close(&mut self) -> ServerResult<()>;
}

/// A storage driver.
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    /// Reads a whole file.
    async fn get_content(&self, path: &str) -> ServerResult<Vec<u8>>;

    /// Writes a whole file.
    async fn put_content(&self, path: &str, content: &[u8]) -> ServerResult<()>;

    /// Opens a file for reading at an offset.
    async fn reader(
        &self,
        path: &str,
        offset: u64,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>>;

    /// Opens a file for writing, optionally appending to existing
    /// content.
    async fn writer(&self, path: &str, append: bool) -> ServerResult<Box<dyn FileWriter>>;

    /// Returns metadata of a file or directory.
    async fn stat(&self, path: &str) -> ServerResult<FileInfo>;

    /// Lists the entries of a directory.
    async fn list(&self, path: &str) -> ServerResult<Vec<String>>;

    /// Deletes a file or directory subtree.
    async fn delete(&self, path: &str) -> ServerResult<()>;

    /// Moves a file.
    async fn rename(&self, from: &str, to: &str) -> ServerResult<()>;

    /// Recursively lists all files under a directory.
    async fn walk(&self, path: &str) -> ServerResult<Vec<FileInfo>>;

    /// Returns a direct URL for a file, if the backend supports it.
    async fn redirect_url(&self, path: &str) -> ServerResult<Option<String>>;
}

/// Validates a storage path.
///
/// Paths are slash-separated sequences of `[A-Za-z0-9_.-]+` segments
/// with no empty segments (and thus no double slashes). A single
/// leading slash is tolerated.
pub fn validate_path(path: &str) -> ServerResult<()> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);

    if trimmed.is_empty() {
        return Err(ServerError::InvalidPath {
            path: path.to_owned(),
        });
    }

    for segment in trimmed.split('/') {
        if !PATH_SEGMENT_REGEX.is_match(segment) {
            return Err(ServerError::InvalidPath {
                path: path.to_owned(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("ab/cd/abcd1234").is_ok());
        assert!(validate_path("/ab/cd/abcd1234").is_ok());
        assert!(validate_path("index.yaml").is_ok());

        assert!(validate_path("").is_err());
        assert!(validate_path("/").is_err());
        assert!(validate_path("a//b").is_err());
        assert!(validate_path("a/b/").is_err());
        assert!(validate_path("a/b c").is_err());
        assert!(validate_path("a/sha256:ff").is_err());
    }
}
