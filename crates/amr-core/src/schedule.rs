//! Drafts held back by «Send later». The janitor publishes them once due.

use std::{collections::HashMap, time::Duration};

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    domain::{DraftId, UserId},
    publish::Draft,
};

#[derive(Clone, Debug)]
pub struct Scheduled {
    pub draft: Draft,
    pub due: Instant,
}

#[derive(Default)]
pub struct DelayedSends {
    queue: Mutex<HashMap<DraftId, Scheduled>>,
}

impl DelayedSends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `draft` for publishing after `delay`. Re-queuing the same draft
    /// keeps the earlier deadline.
    pub async fn schedule(&self, draft: Draft, delay: Duration) -> Instant {
        let mut q = self.queue.lock().await;
        q.entry(draft.draft_id.clone())
            .or_insert_with(|| Scheduled {
                draft,
                due: Instant::now() + delay,
            })
            .due
    }

    /// Withdraw a queued draft. Only its author may; returns it if removed.
    pub async fn cancel(&self, user_id: UserId, draft_id: &DraftId) -> Option<Draft> {
        let mut q = self.queue.lock().await;
        match q.get(draft_id) {
            Some(s) if s.draft.user_id == user_id => q.remove(draft_id).map(|s| s.draft),
            _ => None,
        }
    }

    /// Remove and return every draft whose time has come, oldest first.
    pub async fn take_due(&self) -> Vec<Draft> {
        let now = Instant::now();
        let mut q = self.queue.lock().await;
        let mut due: Vec<Scheduled> = Vec::new();
        q.retain(|_, s| {
            if s.due <= now {
                due.push(s.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|s| s.due);
        due.into_iter().map(|s| s.draft).collect()
    }

    pub async fn pending_for(&self, user_id: UserId) -> usize {
        self.queue
            .lock()
            .await
            .values()
            .filter(|s| s.draft.user_id == user_id)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}
