//! Content store.
//!
//! A thin wrapper over the storage driver that maps every path under
//! a configured prefix and adds stream-in convenience helpers.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{validate_path, FileInfo, FileWriter, StorageDriver};
use crate::error::{ServerError, ServerResult};

/// Read buffer size for streaming saves.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Derives the on-disk path of a blob ref.
///
/// Refs of 32+ characters fan out on their first four characters
/// (`aa/bb/aabbccdd…`); anything shorter, or containing a slash, is
/// stored verbatim.
pub fn blob_path(blob_ref: &str) -> String {
    if blob_ref.len() >= 32 && !blob_ref.contains('/') {
        format!("{}/{}/{}", &blob_ref[0..2], &blob_ref[2..4], blob_ref)
    } else {
        blob_ref.to_owned()
    }
}

pub struct ContentStore {
    driver: Arc<dyn StorageDriver>,
    prefix: String,
}

impl ContentStore {
    pub fn new(driver: Arc<dyn StorageDriver>, prefix: String) -> Self {
        Self { driver, prefix }
    }

    fn full_path(&self, path: &str) -> ServerResult<String> {
        let full = if self.prefix.is_empty() {
            path.to_owned()
        } else {
            format!("{}/{}", self.prefix, path.strip_prefix('/').unwrap_or(path))
        };

        validate_path(&full)?;

        Ok(full)
    }

    /// Reads a whole file.
    pub async fn get(&self, path: &str) -> ServerResult<Vec<u8>> {
        self.driver.get_content(&self.full_path(path)?).await
    }

    /// Writes a whole file.
    pub async fn put(&self, path: &str, content: &[u8]) -> ServerResult<()> {
        self.driver.put_content(&self.full_path(path)?, content).await
    }

    /// Opens a file for reading at an offset.
    pub async fn open(
        &self,
        path: &str,
        offset: u64,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>> {
        self.driver.reader(&self.full_path(path)?, offset).await
    }

    /// Opens a streaming writer.
    pub async fn writer(&self, path: &str, append: bool) -> ServerResult<Box<dyn FileWriter>> {
        self.driver.writer(&self.full_path(path)?, append).await
    }

    /// Streams a reader into a file, committing on success and
    /// cancelling the partial file on error.
    pub async fn save(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ServerResult<u64> {
        let mut writer = self.writer(path, false).await?;

        match copy_into(reader, writer.as_mut()).await {
            Ok(size) => {
                writer.commit().await?;
                writer.close().await?;
                Ok(size)
            }
            Err(e) => {
                let _ = writer.cancel().await;
                let _ = writer.close().await;
                Err(e)
            }
        }
    }

    pub async fn stat(&self, path: &str) -> ServerResult<FileInfo> {
        self.driver.stat(&self.full_path(path)?).await
    }

    /// Lists a directory, lexicographically sorted.
    pub async fn list(&self, path: &str) -> ServerResult<Vec<String>> {
        let mut entries = self.driver.list(&self.full_path(path)?).await?;
        entries.sort();
        Ok(entries)
    }

    pub async fn delete(&self, path: &str) -> ServerResult<()> {
        self.driver.delete(&self.full_path(path)?).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> ServerResult<()> {
        self.driver
            .rename(&self.full_path(from)?, &self.full_path(to)?)
            .await
    }

    pub async fn redirect_url(&self, path: &str) -> ServerResult<Option<String>> {
        self.driver.redirect_url(&self.full_path(path)?).await
    }
}

/// Copies a reader into a file writer, returning the bytes copied.
pub async fn copy_into(
    reader: &mut (dyn AsyncRead + Unpin + Send),
    writer: &mut dyn FileWriter,
) -> ServerResult<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let read = reader
            .read(&mut buf)
            .await
            .map_err(ServerError::storage_error)?;
        if read == 0 {
            break;
        }

        writer.write(&buf[..read]).await?;
        copied += read as u64;
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ServerError;
    use crate::storage::local::{LocalBackend, LocalStorageConfig, DEFAULT_MAX_THREADS};

    #[test]
    fn test_blob_path() {
        assert_eq!(
            "01/23/0123456789abcdef0123456789abcdef",
            blob_path("0123456789abcdef0123456789abcdef")
        );
        assert_eq!("short", blob_path("short"));
        assert_eq!(
            "already/nested/0123456789abcdef0123456789abcdef",
            blob_path("already/nested/0123456789abcdef0123456789abcdef")
        );
    }

    async fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(LocalStorageConfig {
            root_directory: dir.path().to_owned(),
            max_threads: DEFAULT_MAX_THREADS,
        })
        .await
        .unwrap();

        let store = ContentStore::new(Arc::new(backend), "blobs".to_string());
        (dir, store)
    }

    #[tokio::test]
    async fn test_prefix_and_save() {
        let (dir, store) = store().await;

        let mut payload: &[u8] = b"chart bytes";
        let size = store.save("ab/cd/abcd", &mut payload).await.unwrap();
        assert_eq!(11, size);

        assert!(dir.path().join("blobs/ab/cd/abcd").is_file());
        assert_eq!(b"chart bytes".to_vec(), store.get("ab/cd/abcd").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let (_dir, store) = store().await;

        store.put("d/b", b"2").await.unwrap();
        store.put("d/a", b"1").await.unwrap();
        store.put("d/c", b"3").await.unwrap();

        assert_eq!(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            store.list("d").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let (_dir, store) = store().await;

        assert!(matches!(
            store.put("a//b", b"x").await,
            Err(ServerError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.get("sha256:abcd").await,
            Err(ServerError::InvalidPath { .. })
        ));
    }
}
