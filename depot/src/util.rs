//! Misc utilities.

use std::future::Future;
use std::mem;

use tokio::task;

/// Runs a cleanup future when dropped, unless defused.
///
/// This models "undo unless everything succeeded" for external
/// resources (files on disk, database rows) whose cleanup cannot be
/// expressed through ownership alone. Call [`Finally::cancel`] once
/// the guarded steps have all succeeded.
pub struct Finally<F: Future + Send + 'static>
where
    F::Output: Send + 'static,
{
    f: Option<F>,
}

impl<F: Future + Send + 'static> Finally<F>
where
    F::Output: Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Some(f) }
    }

    /// Defuses the guard; the cleanup future never runs.
    pub fn cancel(self) {
        mem::forget(self);
    }
}

impl<F: Future + Send + 'static> Drop for Finally<F>
where
    F::Output: Send + 'static,
{
    fn drop(&mut self) {
        task::spawn(self.f.take().unwrap());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_on_drop() {
        let fired = Arc::new(AtomicBool::new(false));

        {
            let fired = fired.clone();
            let _guard = Finally::new(async move {
                fired.store(true, Ordering::SeqCst);
            });
        }

        // The cleanup runs as a spawned task
        task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_defuses() {
        let fired = Arc::new(AtomicBool::new(false));

        {
            let fired = fired.clone();
            let guard = Finally::new(async move {
                fired.store(true, Ordering::SeqCst);
            });
            guard.cancel();
        }

        task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
