//! Local file storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncRead, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use super::{validate_path, FileInfo, FileWriter, StorageDriver};
use crate::error::{ServerError, ServerResult};

/// Default cap on concurrent driver calls.
pub const DEFAULT_MAX_THREADS: usize = 100;

/// Lower bound on the concurrency cap.
pub const MIN_MAX_THREADS: usize = 25;

#[derive(Debug)]
pub struct LocalBackend {
    config: LocalStorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// The directory to store all files under.
    #[serde(rename = "root-directory")]
    pub root_directory: PathBuf,

    /// Cap on concurrent storage operations.
    ///
    /// Values below the minimum of 25 are raised to it.
    #[serde(rename = "max-threads")]
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

enum WriterState {
    Open,
    Committed,
    Cancelled,
    Closed,
}

/// A streaming writer onto the local filesystem.
pub struct LocalFileWriter {
    path: PathBuf,
    file: Option<File>,
    size: u64,
    state: WriterState,
}

impl LocalBackend {
    pub async fn new(config: LocalStorageConfig) -> ServerResult<Self> {
        fs::create_dir_all(&config.root_directory)
            .await
            .map_err(ServerError::storage_error)?;

        set_dir_permissions(&config.root_directory).await;

        Ok(Self { config })
    }

    fn get_path(&self, p: &str) -> ServerResult<PathBuf> {
        validate_path(p)?;
        Ok(self.config.root_directory.join(p.strip_prefix('/').unwrap_or(p)))
    }

    async fn ensure_parent(&self, path: &Path) -> ServerResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(ServerError::storage_error)?;
            set_dir_permissions(parent).await;
        }

        Ok(())
    }
}

#[async_trait]
impl StorageDriver for LocalBackend {
    async fn get_content(&self, path: &str) -> ServerResult<Vec<u8>> {
        let full = self.get_path(path)?;

        fs::read(&full).await.map_err(|e| io_error(path, e))
    }

    async fn put_content(&self, path: &str, content: &[u8]) -> ServerResult<()> {
        let full = self.get_path(path)?;
        self.ensure_parent(&full).await?;

        fs::write(&full, content)
            .await
            .map_err(ServerError::storage_error)?;
        set_file_permissions(&full).await;

        Ok(())
    }

    async fn reader(
        &self,
        path: &str,
        offset: u64,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>> {
        let full = self.get_path(path)?;

        let mut file = File::open(&full).await.map_err(|e| io_error(path, e))?;

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(ServerError::storage_error)?;
        }

        Ok(Box::new(file))
    }

    async fn writer(&self, path: &str, append: bool) -> ServerResult<Box<dyn FileWriter>> {
        let full = self.get_path(path)?;
        self.ensure_parent(&full).await?;

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }

        let file = options
            .open(&full)
            .await
            .map_err(ServerError::storage_error)?;
        set_file_permissions(&full).await;

        let size = if append {
            file.metadata()
                .await
                .map_err(ServerError::storage_error)?
                .len()
        } else {
            0
        };

        Ok(Box::new(LocalFileWriter {
            path: full,
            file: Some(file),
            size,
            state: WriterState::Open,
        }))
    }

    async fn stat(&self, path: &str) -> ServerResult<FileInfo> {
        let full = self.get_path(path)?;

        let metadata = fs::metadata(&full).await.map_err(|e| io_error(path, e))?;

        Ok(FileInfo {
            path: path.to_owned(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            is_dir: metadata.is_dir(),
        })
    }

    async fn list(&self, path: &str) -> ServerResult<Vec<String>> {
        let full = self.get_path(path)?;

        let mut dir = fs::read_dir(&full).await.map_err(|e| io_error(path, e))?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await.map_err(ServerError::storage_error)? {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> ServerResult<()> {
        let full = self.get_path(path)?;

        let metadata = fs::metadata(&full).await.map_err(|e| io_error(path, e))?;

        if metadata.is_dir() {
            fs::remove_dir_all(&full)
                .await
                .map_err(ServerError::storage_error)?;
        } else {
            fs::remove_file(&full)
                .await
                .map_err(ServerError::storage_error)?;
        }

        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> ServerResult<()> {
        let from_full = self.get_path(from)?;
        let to_full = self.get_path(to)?;
        self.ensure_parent(&to_full).await?;

        fs::rename(&from_full, &to_full)
            .await
            .map_err(|e| io_error(from, e))
    }

    async fn walk(&self, path: &str) -> ServerResult<Vec<FileInfo>> {
        let mut pending = vec![path.to_owned()];
        let mut found = Vec::new();

        while let Some(dir) = pending.pop() {
            for name in self.list(&dir).await? {
                let child = format!("{}/{}", dir, name);
                let info = self.stat(&child).await?;

                if info.is_dir {
                    pending.push(child);
                } else {
                    found.push(info);
                }
            }
        }

        Ok(found)
    }

    async fn redirect_url(&self, _path: &str) -> ServerResult<Option<String>> {
        Ok(None)
    }
}

impl LocalFileWriter {
    fn file_mut(&mut self) -> ServerResult<&mut File> {
        match self.state {
            WriterState::Open => Ok(self.file.as_mut().expect("Open writer holds a file")),
            _ => Err(ServerError::WriterFinalized),
        }
    }
}

#[async_trait]
impl FileWriter for LocalFileWriter {
    fn size(&self) -> u64 {
        self.size
    }

    async fn write(&mut self, buf: &[u8]) -> ServerResult<()> {
        let file = self.file_mut()?;

        file.write_all(buf)
            .await
            .map_err(ServerError::storage_error)?;
        self.size += buf.len() as u64;

        Ok(())
    }

    async fn commit(&mut self) -> ServerResult<()> {
        let file = self.file_mut()?;

        file.flush().await.map_err(ServerError::storage_error)?;
        file.sync_all().await.map_err(ServerError::storage_error)?;

        self.file.take();
        self.state = WriterState::Committed;

        Ok(())
    }

    async fn cancel(&mut self) -> ServerResult<()> {
        match self.state {
            WriterState::Open => {}
            _ => return Err(ServerError::WriterFinalized),
        }

        self.file.take();
        self.state = WriterState::Cancelled;

        fs::remove_file(&self.path)
            .await
            .map_err(ServerError::storage_error)?;

        Ok(())
    }

    async fn close(&mut self) -> ServerResult<()> {
        match self.state {
            WriterState::Closed => return Err(ServerError::WriterFinalized),
            WriterState::Open => {
                if let Some(mut file) = self.file.take() {
                    file.flush().await.map_err(ServerError::storage_error)?;
                }
            }
            _ => {}
        }

        self.state = WriterState::Closed;

        Ok(())
    }
}

fn io_error(path: &str, error: io::Error) -> ServerError {
    if error.kind() == io::ErrorKind::NotFound {
        ServerError::PathNotFound {
            path: path.to_owned(),
        }
    } else {
        ServerError::storage_error(error)
    }
}

#[cfg(unix)]
async fn set_file_permissions(path: &Path) {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    let _ = fs::set_permissions(path, Permissions::from_mode(0o666)).await;
}

#[cfg(unix)]
async fn set_dir_permissions(path: &Path) {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    let _ = fs::set_permissions(path, Permissions::from_mode(0o777)).await;
}

#[cfg(not(unix))]
async fn set_file_permissions(_path: &Path) {}

#[cfg(not(unix))]
async fn set_dir_permissions(_path: &Path) {}

fn default_max_threads() -> usize {
    DEFAULT_MAX_THREADS
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(LocalStorageConfig {
            root_directory: dir.path().to_owned(),
            max_threads: DEFAULT_MAX_THREADS,
        })
        .await
        .unwrap();

        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_get_stat() {
        let (_dir, backend) = backend().await;

        backend.put_content("ab/cd/abcd", b"hello").await.unwrap();
        assert_eq!(b"hello".to_vec(), backend.get_content("ab/cd/abcd").await.unwrap());

        let info = backend.stat("ab/cd/abcd").await.unwrap();
        assert_eq!(5, info.size);
        assert!(!info.is_dir);

        assert!(matches!(
            backend.stat("ab/cd/missing").await,
            Err(ServerError::PathNotFound { .. })
        ));
        assert!(matches!(
            backend.get_content("bad//path").await,
            Err(ServerError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_writer_commit() {
        let (_dir, backend) = backend().await;

        let mut writer = backend.writer("ab/file", false).await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert_eq!(11, writer.size());

        writer.commit().await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(b"hello world".to_vec(), backend.get_content("ab/file").await.unwrap());

        // Double finalize is an error
        let mut writer = backend.writer("ab/file2", false).await.unwrap();
        writer.commit().await.unwrap();
        assert!(matches!(writer.commit().await, Err(ServerError::WriterFinalized)));
        assert!(matches!(writer.cancel().await, Err(ServerError::WriterFinalized)));
    }

    #[tokio::test]
    async fn test_writer_cancel() {
        let (_dir, backend) = backend().await;

        let mut writer = backend.writer("ab/partial", false).await.unwrap();
        writer.write(b"oops").await.unwrap();
        writer.cancel().await.unwrap();
        writer.close().await.unwrap();

        assert!(matches!(
            backend.stat("ab/partial").await,
            Err(ServerError::PathNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_writer_append() {
        let (_dir, backend) = backend().await;

        let mut writer = backend.writer("ab/resume", false).await.unwrap();
        writer.write(b"part one,").await.unwrap();
        writer.commit().await.unwrap();

        let mut writer = backend.writer("ab/resume", true).await.unwrap();
        assert_eq!(9, writer.size());
        writer.write(b" part two").await.unwrap();
        writer.commit().await.unwrap();

        assert_eq!(
            b"part one, part two".to_vec(),
            backend.get_content("ab/resume").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_rename_delete_list() {
        let (_dir, backend) = backend().await;

        backend.put_content("a/one", b"1").await.unwrap();
        backend.put_content("a/two", b"2").await.unwrap();

        let mut entries = backend.list("a").await.unwrap();
        entries.sort();
        assert_eq!(vec!["one".to_string(), "two".to_string()], entries);

        backend.rename("a/one", "b/one").await.unwrap();
        assert!(backend.stat("b/one").await.is_ok());

        backend.delete("a").await.unwrap();
        assert!(matches!(
            backend.stat("a/two").await,
            Err(ServerError::PathNotFound { .. })
        ));

        let walked = backend.walk("b").await.unwrap();
        assert_eq!(1, walked.len());
        assert_eq!("b/one", walked[0].path);
    }
}
