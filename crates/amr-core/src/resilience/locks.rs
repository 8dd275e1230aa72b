use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held lock; released when dropped, on every exit path.
pub type LockGuard = OwnedMutexGuard<()>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("timed out after {waited:?} waiting for lock {name}")]
pub struct LockTimeout {
    pub name: String,
    pub waited: Duration,
}

/// Named async mutexes (`user:42`, `mailbox:7`, ...), created on first use.
#[derive(Default)]
pub struct LockManager {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, name: &str) -> LockGuard {
        self.entry(name).await.lock_owned().await
    }

    pub async fn lock_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<LockGuard, LockTimeout> {
        let lock = self.entry(name).await;
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| LockTimeout {
                name: name.to_string(),
                waited: timeout,
            })
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        // Only the map references an idle lock; waiters hold a clone of the Arc.
        map.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
