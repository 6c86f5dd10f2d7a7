//! Per-content-hash mutual exclusion.
//!
//! Uploads and reclamation take the lock for a hash only around index
//! bookkeeping. Entries are dropped from the map once the last holder or
//! waiter lets go, so the map stays proportional to in-flight hashes.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct HashLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Holds the lock for one hash until dropped.
pub struct HashLockGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl HashLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, hash: &str) -> HashLockGuard {
        let mutex = self
            .inner
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        HashLockGuard {
            key: hash.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of hashes currently locked or awaited.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for HashLockGuard {
    fn drop(&mut self) {
        // Release the mutex (and our Arc to it) before checking for waiters.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
