//! Per-user composition state.
//!
//! The phase enum carries the data each phase owns, so "draft text is set iff
//! the phase is AwaitingTtl or Preview" and "TTL is set only in Preview" hold by
//! construction rather than by convention.

use std::{collections::HashMap, fmt, time::Duration};

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    config::TtlChoice,
    domain::{DraftId, MailboxId, UserId},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingText,
    AwaitingTtl {
        draft_text: String,
        pseudonym: String,
    },
    Preview {
        draft_text: String,
        pseudonym: String,
        ttl: TtlChoice,
        draft_id: DraftId,
    },
}

/// Data-free view of [`Phase`] for predicates and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Idle,
    AwaitingText,
    AwaitingTtl,
    Preview,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::AwaitingText => "awaiting_text",
            Self::AwaitingTtl => "awaiting_ttl",
            Self::Preview => "preview",
        })
    }
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::Idle => PhaseKind::Idle,
            Self::AwaitingText => PhaseKind::AwaitingText,
            Self::AwaitingTtl { .. } => PhaseKind::AwaitingTtl,
            Self::Preview { .. } => PhaseKind::Preview,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConversationState {
    pub user_id: UserId,
    pub mailbox_id: Option<MailboxId>,
    pub phase: Phase,
    pub updated_at: Instant,
}

impl ConversationState {
    pub fn idle(user_id: UserId) -> Self {
        Self {
            user_id,
            mailbox_id: None,
            phase: Phase::Idle,
            updated_at: Instant::now(),
        }
    }

    pub fn kind(&self) -> PhaseKind {
        self.phase.kind()
    }

    pub fn draft_text(&self) -> Option<&str> {
        match &self.phase {
            Phase::AwaitingTtl { draft_text, .. } | Phase::Preview { draft_text, .. } => {
                Some(draft_text)
            }
            _ => None,
        }
    }

    pub fn pseudonym(&self) -> Option<&str> {
        match &self.phase {
            Phase::AwaitingTtl { pseudonym, .. } | Phase::Preview { pseudonym, .. } => {
                Some(pseudonym)
            }
            _ => None,
        }
    }

    pub fn chosen_ttl(&self) -> Option<&TtlChoice> {
        match &self.phase {
            Phase::Preview { ttl, .. } => Some(ttl),
            _ => None,
        }
    }

    pub fn draft_id(&self) -> Option<&DraftId> {
        match &self.phase {
            Phase::Preview { draft_id, .. } => Some(draft_id),
            _ => None,
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.updated_at.elapsed()
    }
}

/// Keyed store of conversation states, one entry per user at most.
///
/// Idle users have no entry; `get` synthesizes an idle state for them.
#[derive(Default)]
pub struct ConversationStore {
    inner: Mutex<HashMap<UserId, ConversationState>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: UserId) -> ConversationState {
        self.inner
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::idle(user_id))
    }

    /// Overwrite the user's state. Setting an idle phase removes the entry.
    pub async fn set(&self, mut state: ConversationState) {
        let mut map = self.inner.lock().await;
        if state.phase == Phase::Idle {
            map.remove(&state.user_id);
            return;
        }
        state.updated_at = Instant::now();
        map.insert(state.user_id, state);
    }

    /// Reset to idle, returning the phase that was cleared.
    pub async fn clear(&self, user_id: UserId) -> PhaseKind {
        self.inner
            .lock()
            .await
            .remove(&user_id)
            .map(|s| s.kind())
            .unwrap_or(PhaseKind::Idle)
    }

    /// Clear only if the current state still satisfies `still_current`.
    ///
    /// Used by publish completion so a cancel (or a newer draft) that landed
    /// meanwhile wins.
    pub async fn clear_if(
        &self,
        user_id: UserId,
        still_current: impl FnOnce(&ConversationState) -> bool,
    ) -> bool {
        let mut map = self.inner.lock().await;
        match map.get(&user_id) {
            Some(state) if still_current(state) => {
                map.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Users whose state has been untouched for at least `idle_for`. Nothing
    /// is removed; callers clear each one under the user's lock with
    /// [`Self::clear_if`] and [`ConversationState::idle_for`].
    pub async fn idle_users(&self, idle_for: Duration) -> Vec<UserId> {
        let now = Instant::now();
        self.inner
            .lock()
            .await
            .values()
            .filter(|s| now.saturating_duration_since(s.updated_at) >= idle_for)
            .map(|s| s.user_id)
            .collect()
    }
}
