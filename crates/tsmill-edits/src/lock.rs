//! File-level locking so overlapping operations cannot interleave the
//! Read→Compute→Write cycle on the same file

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Hands out one lock per file path
#[derive(Default)]
pub struct LockManager {
    locks: DashMap<PathBuf, Arc<RwLock<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a file.
    ///
    /// Paths are canonicalized when the file exists so two spellings of the
    /// same file share a lock.
    pub async fn get_lock<P: AsRef<Path>>(&self, path: P) -> Arc<RwLock<()>> {
        let key = Self::key(path.as_ref()).await;
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn key(path: &Path) -> PathBuf {
        tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Drop locks nobody holds anymore
    pub fn cleanup_unused_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_write_lock_is_exclusive() {
        let manager = LockManager::new();
        let lock = manager.get_lock("/repo/src/a.ts").await;

        let _guard = lock.write().await;
        assert!(lock.try_read().is_err());
        assert!(lock.try_write().is_err());
        assert!(manager.get_lock("/repo/src/b.ts").await.try_write().is_ok());
    }

    #[tokio::test]
    async fn test_same_file_shares_lock() {
        let dir = std::env::temp_dir();
        let manager = LockManager::new();

        let direct = manager.get_lock(&dir).await;
        let dotted = manager.get_lock(dir.join(".")).await;
        assert!(Arc::ptr_eq(&direct, &dotted));
        assert_eq!(manager.lock_count(), 1);
    }

    #[tokio::test]
    async fn test_writers_on_same_file_are_serialized() {
        let manager = Arc::new(LockManager::new());
        let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let first = {
            let manager = manager.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let lock = manager.get_lock("/repo/shared.ts").await;
                let _guard = lock.write().await;
                log.lock().await.push("first:start");
                sleep(Duration::from_millis(50)).await;
                log.lock().await.push("first:end");
            })
        };
        sleep(Duration::from_millis(10)).await;
        let second = {
            let manager = manager.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let lock = manager.get_lock("/repo/shared.ts").await;
                let _guard = lock.write().await;
                log.lock().await.push("second");
            })
        };

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*log.lock().await, vec!["first:start", "first:end", "second"]);
    }

    #[tokio::test]
    async fn test_cleanup_unused_locks() {
        let manager = LockManager::new();
        let held = manager.get_lock("/repo/held.ts").await;
        {
            let _released = manager.get_lock("/repo/released.ts").await;
        }
        assert_eq!(manager.lock_count(), 2);

        manager.cleanup_unused_locks();
        assert_eq!(manager.lock_count(), 1);
        drop(held);
    }
}
