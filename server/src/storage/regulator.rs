//! Storage concurrency regulator.
//!
//! Filesystem calls block OS threads. The regulator wraps a driver
//! with a semaphore so at most `max_threads` operations are in flight
//! per driver instance; callers past the cap wait for a slot.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::Semaphore;

use super::local::MIN_MAX_THREADS;
use super::{FileInfo, FileWriter, StorageDriver};
use crate::error::ServerResult;

pub struct Regulator {
    driver: Box<dyn StorageDriver>,
    semaphore: Arc<Semaphore>,
}

impl Regulator {
    pub fn new(driver: Box<dyn StorageDriver>, max_threads: usize) -> Self {
        let max_threads = max_threads.max(MIN_MAX_THREADS);

        Self {
            driver,
            semaphore: Arc::new(Semaphore::new(max_threads)),
        }
    }

    async fn enter(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("Storage semaphore is never closed")
    }
}

#[async_trait]
impl StorageDriver for Regulator {
    async fn get_content(&self, path: &str) -> ServerResult<Vec<u8>> {
        let _permit = self.enter().await;
        self.driver.get_content(path).await
    }

    async fn put_content(&self, path: &str, content: &[u8]) -> ServerResult<()> {
        let _permit = self.enter().await;
        self.driver.put_content(path, content).await
    }

    async fn reader(
        &self,
        path: &str,
        offset: u64,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>> {
        let _permit = self.enter().await;
        self.driver.reader(path, offset).await
    }

    async fn writer(&self, path: &str, append: bool) -> ServerResult<Box<dyn FileWriter>> {
        let _permit = self.enter().await;
        self.driver.writer(path, append).await
    }

    async fn stat(&self, path: &str) -> ServerResult<FileInfo> {
        let _permit = self.enter().await;
        self.driver.stat(path).await
    }

    async fn list(&self, path: &str) -> ServerResult<Vec<String>> {
        let _permit = self.enter().await;
        self.driver.list(path).await
    }

    async fn delete(&self, path: &str) -> ServerResult<()> {
        let _permit = self.enter().await;
        self.driver.delete(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> ServerResult<()> {
        let _permit = self.enter().await;
        self.driver.rename(from, to).await
    }

    async fn walk(&self, path: &str) -> ServerResult<Vec<FileInfo>> {
        let _permit = self.enter().await;
        self.driver.walk(path).await
    }

    async fn redirect_url(&self, path: &str) -> ServerResult<Option<String>> {
        let _permit = self.enter().await;
        self.driver.redirect_url(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::local::{LocalBackend, LocalStorageConfig, DEFAULT_MAX_THREADS};

    #[tokio::test]
    async fn test_min_cap() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(LocalStorageConfig {
            root_directory: dir.path().to_owned(),
            max_threads: DEFAULT_MAX_THREADS,
        })
        .await
        .unwrap();

        let regulator = Regulator::new(Box::new(backend), 1);
        assert_eq!(MIN_MAX_THREADS, regulator.semaphore.available_permits());

        regulator.put_content("ab/x", b"x").await.unwrap();
        assert_eq!(b"x".to_vec(), regulator.get_content("ab/x").await.unwrap());
        assert_eq!(MIN_MAX_THREADS, regulator.semaphore.available_permits());
    }
}
