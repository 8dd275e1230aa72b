//! Publish pipeline: persist a finished draft, send it to the mailbox channel,
//! and undo the persistence step if the send fails.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    config::{Config, TtlChoice},
    domain::{DraftId, MailboxId, MessageRef, UserId},
    errors::{with_timeout, Error},
    formatting::{post_keyboard, render_post},
    messaging::port::MessagingPort,
    ports::{Extension, Mailbox, PostRecord, PostStatus, Storage},
    resilience::{
        guarded, Breakers, Capability, Guarded, LockManager, RollbackKind, RollbackManager,
    },
};

/// A finished draft handed to the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draft {
    pub draft_id: DraftId,
    pub user_id: UserId,
    pub mailbox_id: MailboxId,
    pub text: String,
    pub ttl: TtlChoice,
    pub pseudonym: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedPost {
    pub draft_id: DraftId,
    pub mailbox_id: MailboxId,
    pub message: MessageRef,
    pub link: String,
    pub delete_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("mailbox is busy")]
    Timeout,
    #[error("{0} unavailable")]
    Unavailable(Capability),
    #[error("storage failed: {0}")]
    Storage(String),
    #[error("transport failed: {reason}")]
    Transport { reason: String, timed_out: bool },
}

impl PublishError {
    fn from_storage(e: Guarded<Error>) -> Self {
        match e {
            Guarded::Unavailable => Self::Unavailable(Capability::Storage),
            Guarded::Inner(e) => Self::Storage(e.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendOutcome {
    Added { delete_at: DateTime<Utc> },
    Removed { delete_at: DateTime<Utc> },
}

#[derive(Debug, thiserror::Error)]
pub enum ExtendError {
    #[error("post is no longer live")]
    Gone,
    /// Taking the extension back would leave less than nothing.
    #[error("too little time left to withdraw the extension")]
    TooLate,
    #[error("post is busy")]
    Busy,
    #[error("{0} unavailable")]
    Unavailable(Capability),
    #[error("storage failed: {0}")]
    Storage(String),
}

impl ExtendError {
    fn from_storage(e: Guarded<Error>) -> Self {
        match e {
            Guarded::Unavailable => Self::Unavailable(Capability::Storage),
            Guarded::Inner(e) => Self::Storage(e.to_string()),
        }
    }
}

/// Expiry is computed from the current time rounded down to five minutes, so
/// posts published close together share a deletion slot.
pub fn delete_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let rounded = now.timestamp() - now.timestamp().rem_euclid(300);
    let secs = rounded.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2));
    DateTime::from_timestamp(secs, 0).unwrap_or(now)
}

pub struct Publisher {
    cfg: Arc<Config>,
    storage: Arc<dyn Storage>,
    messenger: Arc<dyn MessagingPort>,
    breakers: Arc<Breakers>,
    locks: Arc<LockManager>,
    rollback: Arc<RollbackManager>,
    /// Sent posts whose Published mark did not reach storage yet, by draft id.
    unmarked: Mutex<HashMap<DraftId, PostRecord>>,
}

impl Publisher {
    pub fn new(
        cfg: Arc<Config>,
        storage: Arc<dyn Storage>,
        messenger: Arc<dyn MessagingPort>,
        breakers: Arc<Breakers>,
        locks: Arc<LockManager>,
        rollback: Arc<RollbackManager>,
    ) -> Self {
        Self {
            cfg,
            storage,
            messenger,
            breakers,
            locks,
            rollback,
            unmarked: Mutex::new(HashMap::new()),
        }
    }

    pub async fn publish(&self, draft: &Draft) -> Result<PublishedPost, PublishError> {
        let _mailbox_guard = self
            .locks
            .lock_timeout(
                &format!("mailbox:{}", draft.mailbox_id),
                self.cfg.mailbox_lock_timeout,
            )
            .await
            .map_err(|e| {
                tracing::warn!(
                    user_id = draft.user_id.0,
                    mailbox_id = draft.mailbox_id.0,
                    error = %e,
                    "publish lock timeout"
                );
                PublishError::Timeout
            })?;

        let storage_breaker = self.breakers.get(Capability::Storage);
        let existing = guarded(storage_breaker, self.storage.post(&draft.draft_id))
            .await
            .map_err(PublishError::from_storage)?;
        let mailbox = guarded(storage_breaker, self.mailbox(draft.mailbox_id))
            .await
            .map_err(PublishError::from_storage)?;

        if let Some(rec) = existing {
            if let (PostStatus::Published, Some(message)) = (rec.status, rec.message) {
                tracing::info!(
                    draft_id = %draft.draft_id,
                    "draft already published, returning existing post"
                );
                return Ok(self.published(&mailbox, &rec, message));
            }
        }

        let now = Utc::now();
        let delete_at = delete_at(now, draft.ttl.duration);
        let mut record = PostRecord {
            draft_id: draft.draft_id.clone(),
            mailbox_id: draft.mailbox_id,
            author_id: draft.user_id,
            pseudonym: draft.pseudonym.clone(),
            text: draft.text.clone(),
            ttl_secs: draft.ttl.duration.as_secs(),
            status: PostStatus::Pending,
            message: None,
            created_at: now.timestamp(),
            delete_at: Some(delete_at.timestamp()),
            extensions: Vec::new(),
        };
        guarded(storage_breaker, self.storage.upsert_post(record.clone()))
            .await
            .map_err(PublishError::from_storage)?;
        let rollback_id = self
            .rollback
            .record(RollbackKind::PendingPost(draft.draft_id.clone()));

        let html = render_post(
            &draft.text,
            &draft.pseudonym,
            delete_at,
            self.cfg.timezone_offset_minutes,
        );
        let keyboard = post_keyboard(&draft.draft_id, &self.cfg.extend_options);
        let sent = guarded(
            self.breakers.get(Capability::Transport),
            with_timeout(
                self.cfg.transport_timeout,
                "publish post",
                self.messenger
                    .send_inline_keyboard(mailbox.channel_id, &html, keyboard),
            ),
        )
        .await;

        let message = match sent {
            Ok(m) => m,
            Err(e) => {
                let err = match e {
                    Guarded::Unavailable => PublishError::Unavailable(Capability::Transport),
                    Guarded::Inner(e) => {
                        let timed_out = e.is_timeout();
                        if timed_out {
                            tracing::warn!(
                                user_id = draft.user_id.0,
                                mailbox_id = draft.mailbox_id.0,
                                error = %e,
                                "publish send timed out"
                            );
                        }
                        PublishError::Transport {
                            reason: e.to_string(),
                            timed_out,
                        }
                    }
                };
                let storage = self.storage.clone();
                let outcome = self
                    .rollback
                    .rollback(rollback_id, |kind| async move {
                        let RollbackKind::PendingPost(id) = kind;
                        storage.delete_post(&id).await.map(|_| ())
                    })
                    .await;
                tracing::warn!(
                    user_id = draft.user_id.0,
                    mailbox_id = draft.mailbox_id.0,
                    draft_id = %draft.draft_id,
                    error = %err,
                    rollback = ?outcome,
                    "publish failed"
                );
                return Err(err);
            }
        };

        record.status = PostStatus::Published;
        record.message = Some(message);
        self.mark_published(&record).await;
        self.rollback.commit(rollback_id);

        tracing::info!(
            user_id = draft.user_id.0,
            mailbox_id = draft.mailbox_id.0,
            draft_id = %draft.draft_id,
            "post published"
        );
        Ok(self.published(&mailbox, &record, message))
    }

    /// Add `user_id`'s extension of `option` to a live post, or take it back
    /// if they already added it. The channel post is re-rendered with the new
    /// deletion time.
    pub async fn toggle_extension(
        &self,
        draft_id: &DraftId,
        user_id: UserId,
        option: &TtlChoice,
    ) -> Result<ExtendOutcome, ExtendError> {
        let _post_guard = self
            .locks
            .lock_timeout(&format!("post:{draft_id}"), self.cfg.mailbox_lock_timeout)
            .await
            .map_err(|_| ExtendError::Busy)?;

        let storage_breaker = self.breakers.get(Capability::Storage);
        let mut rec = guarded(storage_breaker, self.storage.post(draft_id))
            .await
            .map_err(ExtendError::from_storage)?
            .ok_or(ExtendError::Gone)?;
        let now = Utc::now().timestamp();
        let (PostStatus::Published, Some(message), Some(at)) = (rec.status, rec.message, rec.delete_at)
        else {
            return Err(ExtendError::Gone);
        };
        if at <= now {
            return Err(ExtendError::Gone);
        }

        let mine = rec
            .extensions
            .iter()
            .position(|e| e.user_id == user_id && e.label == option.label);
        let added = match mine {
            Some(i) => {
                let secs = i64::try_from(rec.extensions[i].secs).unwrap_or(i64::MAX);
                if at - now < secs {
                    return Err(ExtendError::TooLate);
                }
                rec.extensions.remove(i);
                rec.delete_at = Some(at - secs);
                false
            }
            None => {
                let secs = option.duration.as_secs();
                rec.extensions.push(Extension {
                    user_id,
                    label: option.label.clone(),
                    secs,
                });
                rec.delete_at = Some(at.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX / 2)));
                true
            }
        };
        guarded(storage_breaker, self.storage.upsert_post(rec.clone()))
            .await
            .map_err(ExtendError::from_storage)?;

        let delete_at = rec
            .delete_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        let html = render_post(
            &rec.text,
            &rec.pseudonym,
            delete_at,
            self.cfg.timezone_offset_minutes,
        );
        let refreshed = guarded(
            self.breakers.get(Capability::Transport),
            with_timeout(
                self.cfg.transport_timeout,
                "refresh post",
                self.messenger.edit_inline_keyboard(
                    message,
                    &html,
                    post_keyboard(draft_id, &self.cfg.extend_options),
                ),
            ),
        )
        .await;
        if let Err(e) = refreshed {
            // The record decides when the janitor deletes; the visible line is cosmetic.
            tracing::warn!(draft_id = %draft_id, error = %e, "post refresh failed");
        }

        tracing::info!(
            draft_id = %draft_id,
            user_id = user_id.0,
            label = %option.label,
            added,
            "post lifetime changed"
        );
        Ok(if added {
            ExtendOutcome::Added { delete_at }
        } else {
            ExtendOutcome::Removed { delete_at }
        })
    }

    /// Persist the Published mark. The post is already live, so a failed write
    /// is retried once and then parked for [`Self::flush_unmarked`]; the
    /// publish itself still succeeds.
    async fn mark_published(&self, record: &PostRecord) {
        let breaker = self.breakers.get(Capability::Storage);
        let mut last = None;
        for _ in 0..2 {
            match guarded(breaker, self.storage.upsert_post(record.clone())).await {
                Ok(()) => return,
                Err(e) => last = Some(e),
            }
        }
        tracing::error!(
            draft_id = %record.draft_id,
            error = %last.map(|e| e.to_string()).unwrap_or_default(),
            "failed to mark post published, parked for retry"
        );
        self.parked().insert(record.draft_id.clone(), record.clone());
    }

    fn parked(&self) -> std::sync::MutexGuard<'_, HashMap<DraftId, PostRecord>> {
        self.unmarked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live posts still waiting for their Published mark.
    pub fn unmarked(&self) -> usize {
        self.parked().len()
    }

    /// Retry parked Published marks; returns how many reached storage. Run
    /// before expiry so a recovered post is deleted on schedule.
    pub async fn flush_unmarked(&self) -> usize {
        let parked: Vec<PostRecord> = self.parked().values().cloned().collect();
        let breaker = self.breakers.get(Capability::Storage);
        let mut flushed = 0;
        for record in parked {
            match guarded(breaker, self.storage.upsert_post(record.clone())).await {
                Ok(()) => {
                    self.parked().remove(&record.draft_id);
                    flushed += 1;
                }
                Err(Guarded::Unavailable) => break,
                Err(e) => {
                    tracing::warn!(draft_id = %record.draft_id, error = %e, "published mark retry failed");
                }
            }
        }
        flushed
    }

    async fn mailbox(&self, id: MailboxId) -> crate::Result<Mailbox> {
        self.storage
            .mailbox(id)
            .await?
            .ok_or_else(|| Error::Storage(format!("mailbox {id} not found")))
    }

    fn published(&self, mailbox: &Mailbox, rec: &PostRecord, message: MessageRef) -> PublishedPost {
        let delete_at = rec
            .delete_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        PublishedPost {
            draft_id: rec.draft_id.clone(),
            mailbox_id: rec.mailbox_id,
            message,
            link: mailbox.channel.post_link(message.message_id),
            delete_at,
        }
    }
}
