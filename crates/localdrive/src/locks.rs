//! Per-path advisory locks serializing mutations on the same entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<PathBuf, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct PathLocks {
    table: Arc<LockTable>,
}

/// Held for the duration of one mutation. The table entry is dropped once
/// the last holder or waiter lets go.
pub struct PathGuard {
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
    key: PathBuf,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &Path) -> PathGuard {
        let mutex = self
            .table
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        PathGuard {
            guard: Some(mutex.lock_owned().await),
            table: Arc::clone(&self.table),
            key: path.to_path_buf(),
        }
    }

    /// Lock two paths in a fixed order so concurrent renames cannot deadlock.
    pub async fn lock_pair(&self, a: &Path, b: &Path) -> (PathGuard, Option<PathGuard>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }

    pub fn held(&self) -> usize {
        self.table.len()
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
