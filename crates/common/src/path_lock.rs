//! Named, reference-counted mutual exclusion over logical paths.
//!
//! The registry map is guarded by a short synchronous lock that is never
//! held while a caller waits on or holds a path. Entries live exactly as
//! long as some handle references them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as PathMutex, OwnedMutexGuard};

#[derive(Debug)]
struct Slot {
    mutex: Arc<PathMutex<()>>,
    refs: usize,
}

#[derive(Debug, Default)]
pub struct PathLockRegistry {
    entries: Mutex<HashMap<String, Slot>>,
}

impl PathLockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reference the lock for `path`, creating it on first use.
    pub fn acquire(self: &Arc<Self>, path: &str) -> PathLockHandle {
        let mut entries = self.entries.lock();
        let slot = entries.entry(path.to_string()).or_insert_with(|| Slot {
            mutex: Arc::new(PathMutex::new(())),
            refs: 0,
        });
        slot.refs += 1;

        PathLockHandle {
            registry: self.clone(),
            key: path.to_string(),
            mutex: slot.mutex.clone(),
        }
    }

    /// Acquire and enter in one step.
    pub async fn lock(self: &Arc<Self>, path: &str) -> PathLock {
        self.acquire(path).enter_owned().await
    }

    /// Lock several paths in sorted order, skipping duplicates.
    pub async fn lock_all(self: &Arc<Self>, paths: &[&str]) -> Vec<PathLock> {
        let mut sorted: Vec<&str> = paths.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut locks = Vec::with_capacity(sorted.len());
        for path in sorted {
            locks.push(self.lock(path).await);
        }
        locks
    }

    /// Number of paths currently referenced.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn release(&self, key: &str) {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get_mut(key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                entries.remove(key);
            }
        }
    }
}

/// A reference to one path's lock. Dropping it releases the reference.
#[derive(Debug)]
pub struct PathLockHandle {
    registry: Arc<PathLockRegistry>,
    key: String,
    mutex: Arc<PathMutex<()>>,
}

impl PathLockHandle {
    pub fn path(&self) -> &str {
        &self.key
    }

    /// Wait for exclusive access to the path.
    pub async fn enter(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.mutex.lock().await
    }

    /// Like [`PathLockHandle::enter`], keeping the handle inside the guard.
    pub async fn enter_owned(self) -> PathLock {
        let guard = self.mutex.clone().lock_owned().await;
        PathLock {
            _guard: guard,
            _handle: self,
        }
    }
}

impl Drop for PathLockHandle {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

/// Exclusive access to a path until dropped.
#[derive(Debug)]
pub struct PathLock {
    // field order: the guard is released before the handle
    _guard: OwnedMutexGuard<()>,
    _handle: PathLockHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_entries_are_refcounted() {
        let registry = PathLockRegistry::new();
        let a = registry.acquire("b/x");
        let b = registry.acquire("b/x");
        let c = registry.acquire("b/y");
        assert_eq!(registry.len(), 2);

        drop(a);
        assert_eq!(registry.len(), 2);
        drop(b);
        assert_eq!(registry.len(), 1);
        drop(c);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let registry = PathLockRegistry::new();
        let first = registry.lock("b/x").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _lock = registry.lock("b/x").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_block() {
        let registry = PathLockRegistry::new();
        let _x = registry.lock("b/x").await;
        let y = tokio::time::timeout(Duration::from_millis(100), registry.lock("b/y")).await;
        assert!(y.is_ok());
    }

    #[tokio::test]
    async fn test_lock_all_dedups() {
        let registry = PathLockRegistry::new();
        let locks = registry.lock_all(&["b/z", "b/a", "b/z"]).await;
        assert_eq!(locks.len(), 2);
        assert_eq!(registry.len(), 2);
        drop(locks);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_enter_borrowed_guard() {
        let registry = PathLockRegistry::new();
        let handle = registry.acquire("b/x");
        {
            let _guard = handle.enter().await;
            assert_eq!(handle.path(), "b/x");
        }
        drop(handle);
        assert!(registry.is_empty());
    }
}
