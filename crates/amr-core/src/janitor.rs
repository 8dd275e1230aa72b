//! Periodic housekeeping: expire idle drafts and relays, drop stale
//! resilience and moderation state, publish delayed drafts, and delete
//! channel posts whose time is up.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::AuditEvent,
    compose::{Accepted, Outcome, Rejection},
    errors::with_timeout,
    formatting::{escape_html, format_expiry},
    moderation::format_remaining,
    publish::Draft,
    resilience::{guarded, Capability, Guarded},
    services::Core,
};

const RELAY_EXPIRED_NOTICE: &str = "⌛ The dialogue has ended after a period of silence.";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_conversations: usize,
    pub expired_relays: usize,
    pub delayed_sent: usize,
    pub delayed_failed: usize,
    pub moderation_purged: usize,
    pub marks_flushed: usize,
    pub rollbacks_purged: usize,
    pub locks_swept: usize,
    pub buckets_purged: usize,
    pub posts_expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub async fn sweep_once(core: &Core) -> SweepReport {
    let mut report = SweepReport::default();

    report.idle_conversations = expire_idle(core).await;

    let relays = core.relays.sweep_expired().await;
    for relay in &relays {
        core.audit.record(AuditEvent::relay_closed(
            relay.initiator,
            relay.author,
            "expired",
        ));
        for side in [relay.initiator, relay.author] {
            if let Err(e) = core
                .messenger
                .send_html(side.into(), RELAY_EXPIRED_NOTICE)
                .await
            {
                tracing::warn!(user_id = side.0, error = %e, "relay expiry notice failed");
            }
        }
    }
    report.expired_relays = relays.len();

    report.rollbacks_purged = core.rollback.purge_expired();
    report.locks_swept = core.locks.sweep().await;
    // A bucket idle for a whole window is full again; forgetting it is lossless.
    report.buckets_purged = core.limiter.purge_idle(core.cfg.rate_limit_window).await;
    for draft in core.delayed.take_due().await {
        if publish_delayed(core, &draft).await {
            report.delayed_sent += 1;
        } else {
            report.delayed_failed += 1;
        }
    }
    report.moderation_purged = match guarded(
        core.breakers.get(Capability::Storage),
        core.storage.purge_moderation(Utc::now().timestamp()),
    )
    .await
    {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "moderation purge failed");
            0
        }
    };
    // Parked records first, so their posts are visible to the expiry pass.
    report.marks_flushed = core.publisher.flush_unmarked().await;
    report.posts_expired = expire_posts(core).await;

    if !report.is_empty() {
        tracing::info!(?report, "janitor sweep");
    }
    report
}

/// Clear drafts left untouched for `session_idle_timeout`. Each user is
/// re-checked under their dispatch lock, so a draft advanced meanwhile stays.
async fn expire_idle(core: &Core) -> usize {
    let idle_for = core.cfg.session_idle_timeout;
    let mut cleared = 0;
    for user_id in core.conversations.idle_users(idle_for).await {
        let _user_guard = core.locks.lock(&format!("user:{user_id}")).await;
        if core
            .conversations
            .clear_if(user_id, |s| s.idle_for() >= idle_for)
            .await
        {
            tracing::debug!(user_id = user_id.0, "idle draft discarded");
            cleared += 1;
        }
    }
    cleared
}

/// Publish a draft whose «Send later» delay ran out and tell the author how
/// it went. Failed drafts are not retried.
async fn publish_delayed(core: &Core, draft: &Draft) -> bool {
    let (ok, html) = match core.composer.publish_scheduled(draft).await {
        Ok(Outcome::Accepted(Accepted::Published(post))) => (
            true,
            format!(
                "✅ Your delayed letter is up: {}\n{}",
                escape_html(&post.link),
                format_expiry(post.delete_at, core.cfg.timezone_offset_minutes)
            ),
        ),
        Ok(Outcome::Rejected(Rejection::Cooldown { remaining })) => (
            false,
            format!(
                "⏳ Your delayed letter was not sent: you cannot write to this mailbox for another {}.",
                format_remaining(remaining)
            ),
        ),
        Ok(other) => {
            tracing::warn!(draft_id = %draft.draft_id, outcome = ?other, "delayed publish failed");
            (
                false,
                "❌ Your delayed letter could not be published. Please write it again.".to_string(),
            )
        }
        Err(e) => {
            tracing::warn!(draft_id = %draft.draft_id, error = %e, "delayed publish failed");
            (
                false,
                "❌ Your delayed letter could not be published. Please write it again.".to_string(),
            )
        }
    };
    if let Err(e) = core.messenger.send_html(draft.user_id.into(), &html).await {
        tracing::warn!(user_id = draft.user_id.0, error = %e, "delayed publish notice failed");
    }
    ok
}

/// Delete channel posts past their `delete_at`. A post stays queued when the
/// transport is unavailable or times out. Any other failure, typically the
/// platform refusing a message already gone or too old, drops the record.
async fn expire_posts(core: &Core) -> usize {
    let storage = core.breakers.get(Capability::Storage);
    let due = match guarded(storage, core.storage.expired_posts(Utc::now().timestamp())).await {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!(error = %e, "listing expired posts failed");
            return 0;
        }
    };

    let mut expired = 0;
    for post in due {
        if let Some(message) = post.message {
            let deleted = guarded(
                core.breakers.get(Capability::Transport),
                with_timeout(
                    core.cfg.transport_timeout,
                    "delete expired post",
                    core.messenger.delete_message(message),
                ),
            )
            .await;
            match deleted {
                Ok(()) => {}
                Err(Guarded::Unavailable) => break,
                Err(Guarded::Inner(e)) if e.is_timeout() => {
                    tracing::warn!(draft_id = %post.draft_id, error = %e, "post delete timed out");
                    continue;
                }
                Err(Guarded::Inner(e)) => {
                    tracing::warn!(
                        draft_id = %post.draft_id,
                        error = %e,
                        "post delete failed, dropping record"
                    );
                }
            }
        }
        match guarded(storage, core.storage.delete_post(&post.draft_id)).await {
            Ok(_) => expired += 1,
            Err(e) => tracing::warn!(draft_id = %post.draft_id, error = %e, "post record delete failed"),
        }
    }
    expired
}

/// Run [`sweep_once`] every `every` until `cancel` fires.
pub fn spawn(core: Arc<Core>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                sweep_once(&core).await;
              }
            }
        }
        tracing::debug!("janitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conversation::PhaseKind,
        domain::{ChatId, DraftId, MessageId, MessageRef, UserId},
        ports::{PostRecord, PostStatus, Storage},
        resilience::BreakerState,
        testing::{harness, CHANNEL},
    };

    const WRITER: UserId = UserId(42);

    async fn preview(h: &crate::testing::Harness) -> DraftId {
        let c = &h.core.composer;
        c.auto_compose(WRITER, ChatId(42), "Hello").await.unwrap();
        match c.choose_ttl(WRITER, "1h").await.unwrap() {
            Outcome::Accepted(Accepted::Preview { draft_id, .. }) => draft_id,
            other => panic!("expected preview, got {other:?}"),
        }
    }

    fn due_post(id: &str, mailbox: crate::domain::MailboxId, message_id: i32) -> PostRecord {
        PostRecord {
            draft_id: DraftId(id.to_string()),
            mailbox_id: mailbox,
            author_id: UserId(42),
            pseudonym: "Quiet Otter".to_string(),
            text: "bye".to_string(),
            ttl_secs: 900,
            status: PostStatus::Published,
            message: Some(MessageRef {
                chat_id: CHANNEL,
                message_id: MessageId(message_id),
            }),
            created_at: 0,
            delete_at: Some(1),
            extensions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn expired_posts_are_deleted_from_channel_and_storage() {
        let h = harness().await;
        h.core.storage.upsert_post(due_post("old", h.mailbox.id, 7)).await.unwrap();

        let report = sweep_once(&h.core).await;
        assert_eq!(report.posts_expired, 1);
        assert_eq!(h.messenger.deleted()[0].message_id, MessageId(7));
        assert!(h.core.storage.post(&DraftId("old".into())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_delete_drops_record_but_open_breaker_keeps_it() {
        let h = harness().await;
        h.core.storage.upsert_post(due_post("a", h.mailbox.id, 1)).await.unwrap();
        h.messenger.fail_next(CHANNEL, 1);
        assert_eq!(sweep_once(&h.core).await.posts_expired, 1);

        h.core.storage.upsert_post(due_post("b", h.mailbox.id, 2)).await.unwrap();
        for _ in 0..3 {
            h.core.breakers.get(Capability::Transport).record_failure();
        }
        assert_eq!(sweep_once(&h.core).await.posts_expired, 0);
        assert!(h.core.storage.post(&DraftId("b".into())).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_relays_notify_both_sides() {
        let h = harness().await;
        h.core
            .relays
            .open(
                UserId(10),
                UserId(42),
                DraftId("d".into()),
                h.mailbox.id,
                "Reader".into(),
                "Quiet Otter".into(),
            )
            .await
            .unwrap();
        tokio::time::advance(h.core.cfg.relay_ttl + Duration::from_secs(1)).await;

        let report = sweep_once(&h.core).await;
        assert_eq!(report.expired_relays, 1);
        assert_eq!(h.messenger.sent_to(ChatId(10)).len(), 1);
        assert_eq!(h.messenger.sent_to(ChatId(42)).len(), 1);
        assert!(!h.core.relays.is_active(UserId(42)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_drafts_are_discarded() {
        let h = harness().await;
        h.core
            .composer
            .auto_compose(UserId(42), ChatId(42), "Hello")
            .await
            .unwrap();
        tokio::time::advance(h.core.cfg.session_idle_timeout + Duration::from_secs(1)).await;

        assert_eq!(sweep_once(&h.core).await.idle_conversations, 1);
        assert_eq!(h.core.conversations.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_janitor_stops_on_cancel() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let handle = spawn(h.core.clone(), Duration::from_secs(30), cancel.clone());
        tokio::time::advance(Duration::from_secs(61)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn refused_deletes_drop_records_without_tripping_transport() {
        let h = harness().await;
        for (i, id) in ["a", "b", "c", "d"].into_iter().enumerate() {
            h.core
                .storage
                .upsert_post(due_post(id, h.mailbox.id, i as i32 + 1))
                .await
                .unwrap();
        }
        h.messenger.reject_always(CHANNEL);

        assert_eq!(sweep_once(&h.core).await.posts_expired, 4);
        assert_eq!(
            h.core.breakers.get(Capability::Transport).state(),
            BreakerState::Closed
        );
        assert!(h.core.storage.expired_posts(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_expiry_waits_for_the_user_lock() {
        let h = harness().await;
        h.core
            .composer
            .auto_compose(WRITER, ChatId(42), "Hello")
            .await
            .unwrap();
        tokio::time::advance(h.core.cfg.session_idle_timeout + Duration::from_secs(1)).await;

        // A handler is mid-flight for this user.
        let guard = h.core.locks.lock(&format!("user:{WRITER}")).await;
        let core = h.core.clone();
        let sweep = tokio::spawn(async move { sweep_once(&core).await });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        h.core.composer.choose_ttl(WRITER, "1h").await.unwrap();
        drop(guard);

        assert_eq!(sweep.await.unwrap().idle_conversations, 0);
        assert_eq!(
            h.core.conversations.get(WRITER).await.kind(),
            PhaseKind::Preview
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_drafts_go_out_when_due() {
        let h = harness().await;
        let draft_id = preview(&h).await;
        h.core.composer.schedule(WRITER, &draft_id).await.unwrap();

        assert_eq!(sweep_once(&h.core).await.delayed_sent, 0);
        assert!(h.messenger.sent_to(CHANNEL).is_empty());

        tokio::time::advance(h.core.cfg.send_delay + Duration::from_secs(1)).await;
        let report = sweep_once(&h.core).await;
        assert_eq!(report.delayed_sent, 1);
        assert_eq!(h.messenger.sent_to(CHANNEL).len(), 1);
        assert!(h
            .messenger
            .last_to(ChatId(42))
            .unwrap()
            .html
            .contains("delayed letter is up"));
        assert_eq!(h.core.delayed.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_draft_failure_is_reported_to_the_author() {
        let h = harness().await;
        let draft_id = preview(&h).await;
        h.core.composer.schedule(WRITER, &draft_id).await.unwrap();
        h.messenger.fail_next(CHANNEL, 1);

        tokio::time::advance(h.core.cfg.send_delay + Duration::from_secs(1)).await;
        let report = sweep_once(&h.core).await;
        assert_eq!((report.delayed_sent, report.delayed_failed), (0, 1));
        assert!(h
            .messenger
            .last_to(ChatId(42))
            .unwrap()
            .html
            .contains("could not be published"));
        assert!(h.core.storage.post(&draft_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parked_publish_marks_are_flushed() {
        let h = harness().await;
        let draft_id = preview(&h).await;
        h.storage.fail_upsert_calls(2..=3);
        assert!(h.core.composer.confirm(WRITER, &draft_id).await.unwrap().is_accepted());
        assert_eq!(h.core.publisher.unmarked(), 1);

        assert_eq!(sweep_once(&h.core).await.marks_flushed, 1);
        assert_eq!(h.core.publisher.unmarked(), 0);
        let rec = h.core.storage.post(&draft_id).await.unwrap().unwrap();
        assert_eq!(rec.status, PostStatus::Published);
        assert!(rec.message.is_some());
    }
}
