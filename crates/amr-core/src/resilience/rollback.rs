use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::time::Instant;

use crate::{domain::DraftId, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RollbackId(u64);

/// A side effect that may need compensating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackKind {
    /// A `Pending` post record written ahead of the transport call.
    PendingPost(DraftId),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RollbackOutcome {
    Compensated,
    /// Already committed, rolled back or purged.
    Unknown,
    Failed(String),
}

struct Entry {
    kind: RollbackKind,
    recorded_at: Instant,
}

/// Tracks compensations for multi-step operations. Handles older than `ttl`
/// are forgotten by `purge_expired`.
pub struct RollbackManager {
    ttl: Duration,
    next: AtomicU64,
    entries: Mutex<HashMap<RollbackId, Entry>>,
}

impl RollbackManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RollbackId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, kind: RollbackKind) -> RollbackId {
        let id = RollbackId(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries().insert(
            id,
            Entry {
                kind,
                recorded_at: Instant::now(),
            },
        );
        id
    }

    /// The operation completed; nothing to compensate.
    pub fn commit(&self, id: RollbackId) -> bool {
        self.entries().remove(&id).is_some()
    }

    /// Run `compensator` for the recorded side effect. Failures are logged and
    /// reported, never propagated.
    pub async fn rollback<F, Fut>(&self, id: RollbackId, compensator: F) -> RollbackOutcome
    where
        F: FnOnce(RollbackKind) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(entry) = self.entries().remove(&id) else {
            return RollbackOutcome::Unknown;
        };
        let kind = entry.kind.clone();
        match compensator(entry.kind).await {
            Ok(()) => {
                tracing::info!(?kind, "rollback compensated");
                RollbackOutcome::Compensated
            }
            Err(e) => {
                tracing::error!(?kind, error = %e, "rollback compensation failed");
                RollbackOutcome::Failed(e.to_string())
            }
        }
    }

    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.recorded_at.elapsed() < ttl);
        let purged = before - entries.len();
        if purged > 0 {
            tracing::warn!(purged, "dropped stale rollback handles");
        }
        purged
    }

    pub fn pending(&self) -> usize {
        self.entries().len()
    }
}
