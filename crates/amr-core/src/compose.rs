//! Composition state machine.
//!
//! ```text
//! Idle -(begin)-> AwaitingText -(submit_text)-> AwaitingTtl -(choose_ttl)-> Preview
//! Preview -(confirm)-> Published (state cleared)
//! any -(cancel)-> Idle
//! ```
//!
//! Expected rejections come back as [`Outcome::Rejected`] with the state left
//! as it was, except moderation (cooldown, blocked word), which discards the
//! draft. `Err` is reserved for collaborator faults.
//!
//! A preview can also be handed to [`DelayedSends`] instead of being published
//! right away; the janitor publishes it once due.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    audit::{AuditEvent, AuditLogger},
    config::{Config, TtlChoice},
    conversation::{ConversationState, ConversationStore, Phase, PhaseKind},
    domain::{ChatId, DraftId, MailboxId, UserId},
    moderation::{find_blocked, longest_cooldown},
    ports::{PseudonymGenerator, SessionContext, Storage},
    pseudonym::pseudonym_or_placeholder,
    publish::{Draft, PublishError, PublishedPost, Publisher},
    resilience::RateLimiter,
    schedule::DelayedSends,
    Result,
};

#[derive(Debug)]
pub enum Accepted {
    AwaitingText {
        mailbox_id: MailboxId,
    },
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
    Published(PublishedPost),
    /// Queued by «Send later».
    Scheduled {
        draft_id: DraftId,
        due_in: Duration,
    },
    /// A queued draft was withdrawn before it went out.
    Unscheduled,
    Cancelled {
        previous: PhaseKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalid {
    Empty,
    TooLong { len: usize, max: usize },
    UnknownTtl(String),
}

#[derive(Debug)]
pub enum Rejection {
    /// No active mailbox; the user needs onboarding.
    NoMailbox,
    WrongPhase(PhaseKind),
    Invalid(Invalid),
    /// The callback refers to a draft that is no longer the current one.
    StaleDraft,
    RateLimited,
    /// The writer is on cooldown for this mailbox.
    Cooldown {
        remaining: Duration,
    },
    Blocked {
        word: String,
        reason: Option<String>,
    },
    Publish(PublishError),
}

#[derive(Debug)]
pub enum Outcome {
    Accepted(Accepted),
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

pub struct Composer {
    cfg: Arc<Config>,
    store: Arc<ConversationStore>,
    storage: Arc<dyn Storage>,
    session: Arc<dyn SessionContext>,
    pseudonyms: Arc<dyn PseudonymGenerator>,
    limiter: Arc<dyn RateLimiter>,
    publisher: Arc<Publisher>,
    delayed: Arc<DelayedSends>,
    audit: Arc<AuditLogger>,
}

impl Composer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<ConversationStore>,
        storage: Arc<dyn Storage>,
        session: Arc<dyn SessionContext>,
        pseudonyms: Arc<dyn PseudonymGenerator>,
        limiter: Arc<dyn RateLimiter>,
        publisher: Arc<Publisher>,
        delayed: Arc<DelayedSends>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            cfg,
            store,
            storage,
            session,
            pseudonyms,
            limiter,
            publisher,
            delayed,
            audit,
        }
    }

    async fn cooldown_remaining(&self, user_id: UserId, mailbox_id: MailboxId) -> Result<Option<Duration>> {
        let now = Utc::now().timestamp();
        let cooldowns = self.storage.cooldowns(user_id, mailbox_id, now).await?;
        Ok(longest_cooldown(&cooldowns, now))
    }

    /// Moderation rejections end the draft.
    async fn discard(&self, user_id: UserId, rejection: Rejection) -> Outcome {
        self.store.clear(user_id).await;
        tracing::info!(user_id = user_id.0, rejection = ?rejection, "draft refused by moderation");
        Outcome::Rejected(rejection)
    }

    pub fn validate_text(&self, raw: &str) -> std::result::Result<String, Invalid> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(Invalid::Empty);
        }
        let len = text.chars().count();
        if len > self.cfg.max_draft_len {
            return Err(Invalid::TooLong {
                len,
                max: self.cfg.max_draft_len,
            });
        }
        Ok(text.to_string())
    }

    /// Start a new draft, discarding any previous one.
    pub async fn begin(&self, user_id: UserId, chat_id: ChatId) -> Result<Outcome> {
        let Some(mailbox_id) = self.session.active_mailbox(user_id, chat_id).await? else {
            return Ok(Outcome::Rejected(Rejection::NoMailbox));
        };
        self.store
            .set(ConversationState {
                user_id,
                mailbox_id: Some(mailbox_id),
                phase: Phase::AwaitingText,
                ..ConversationState::idle(user_id)
            })
            .await;
        tracing::debug!(user_id = user_id.0, mailbox_id = mailbox_id.0, "compose started");
        Ok(Outcome::Accepted(Accepted::AwaitingText { mailbox_id }))
    }

    pub async fn submit_text(&self, user_id: UserId, raw: &str) -> Result<Outcome> {
        let state = self.store.get(user_id).await;
        if state.kind() != PhaseKind::AwaitingText {
            return Ok(Outcome::Rejected(Rejection::WrongPhase(state.kind())));
        }
        let Some(mailbox_id) = state.mailbox_id else {
            return Err(crate::Error::Invariant(
                "awaiting text without a mailbox".to_string(),
            ));
        };
        self.accept_text(user_id, mailbox_id, raw).await
    }

    /// Free text from an idle user: begin and submit in one step. Nothing is
    /// stored unless the text is accepted.
    pub async fn auto_compose(&self, user_id: UserId, chat_id: ChatId, raw: &str) -> Result<Outcome> {
        let Some(mailbox_id) = self.session.active_mailbox(user_id, chat_id).await? else {
            return Ok(Outcome::Rejected(Rejection::NoMailbox));
        };
        self.accept_text(user_id, mailbox_id, raw).await
    }

    async fn accept_text(&self, user_id: UserId, mailbox_id: MailboxId, raw: &str) -> Result<Outcome> {
        if let Some(remaining) = self.cooldown_remaining(user_id, mailbox_id).await? {
            return Ok(self.discard(user_id, Rejection::Cooldown { remaining }).await);
        }
        let draft_text = match self.validate_text(raw) {
            Ok(t) => t,
            Err(invalid) => return Ok(Outcome::Rejected(Rejection::Invalid(invalid))),
        };
        let blocks = self
            .storage
            .word_blocks(mailbox_id, Utc::now().timestamp())
            .await?;
        if let Some(block) = find_blocked(&draft_text, &blocks) {
            let rejection = Rejection::Blocked {
                word: block.word.clone(),
                reason: block.reason.clone(),
            };
            return Ok(self.discard(user_id, rejection).await);
        }
        if !self.limiter.is_allowed(&format!("compose:{user_id}")).await {
            return Ok(Outcome::Rejected(Rejection::RateLimited));
        }

        let pseudonym = pseudonym_or_placeholder(self.pseudonyms.as_ref(), user_id, mailbox_id).await;
        self.store
            .set(ConversationState {
                user_id,
                mailbox_id: Some(mailbox_id),
                phase: Phase::AwaitingTtl {
                    draft_text: draft_text.clone(),
                    pseudonym: pseudonym.clone(),
                },
                ..ConversationState::idle(user_id)
            })
            .await;
        Ok(Outcome::Accepted(Accepted::AwaitingTtl {
            draft_text,
            pseudonym,
        }))
    }

    pub async fn choose_ttl(&self, user_id: UserId, raw: &str) -> Result<Outcome> {
        let state = self.store.get(user_id).await;
        let kind = state.kind();
        let Phase::AwaitingTtl {
            draft_text,
            pseudonym,
        } = state.phase
        else {
            return Ok(Outcome::Rejected(Rejection::WrongPhase(kind)));
        };
        let Some(ttl) = self.cfg.ttl_by_label(raw).cloned() else {
            tracing::debug!(user_id = user_id.0, ttl = raw, "rejected unlisted ttl");
            return Ok(Outcome::Rejected(Rejection::Invalid(Invalid::UnknownTtl(
                raw.to_string(),
            ))));
        };

        let draft_id = DraftId::generate();
        self.store
            .set(ConversationState {
                user_id,
                mailbox_id: state.mailbox_id,
                phase: Phase::Preview {
                    draft_text: draft_text.clone(),
                    pseudonym: pseudonym.clone(),
                    ttl: ttl.clone(),
                    draft_id: draft_id.clone(),
                },
                updated_at: state.updated_at,
            })
            .await;
        Ok(Outcome::Accepted(Accepted::Preview {
            draft_text,
            pseudonym,
            ttl,
            draft_id,
        }))
    }

    /// The draft behind a preview button, if `draft_id` is still current and
    /// the writer may publish.
    async fn current_draft(
        &self,
        user_id: UserId,
        draft_id: &DraftId,
    ) -> Result<std::result::Result<Draft, Rejection>> {
        let state = self.store.get(user_id).await;
        let Phase::Preview {
            draft_text,
            pseudonym,
            ttl,
            draft_id: current,
        } = &state.phase
        else {
            return Ok(Err(Rejection::WrongPhase(state.kind())));
        };
        if current != draft_id {
            return Ok(Err(Rejection::StaleDraft));
        }
        let Some(mailbox_id) = state.mailbox_id else {
            return Err(crate::Error::Invariant(
                "preview without a mailbox".to_string(),
            ));
        };
        if let Some(remaining) = self.cooldown_remaining(user_id, mailbox_id).await? {
            self.store.clear(user_id).await;
            return Ok(Err(Rejection::Cooldown { remaining }));
        }
        Ok(Ok(Draft {
            draft_id: draft_id.clone(),
            user_id,
            mailbox_id,
            text: draft_text.clone(),
            ttl: ttl.clone(),
            pseudonym: pseudonym.clone(),
        }))
    }

    /// Publish the current preview. `draft_id` comes from the pressed button
    /// and must match the stored draft.
    pub async fn confirm(&self, user_id: UserId, draft_id: &DraftId) -> Result<Outcome> {
        let draft = match self.current_draft(user_id, draft_id).await? {
            Ok(d) => d,
            Err(r) => return Ok(Outcome::Rejected(r)),
        };
        match self.publisher.publish(&draft).await {
            Ok(post) => {
                // A cancel or newer draft that landed meanwhile wins.
                let cleared = self
                    .store
                    .clear_if(user_id, |s| s.draft_id() == Some(draft_id))
                    .await;
                if !cleared {
                    tracing::debug!(user_id = user_id.0, "state changed during publish");
                }
                self.audit_published(&draft);
                Ok(Outcome::Accepted(Accepted::Published(post)))
            }
            Err(e) => Ok(Outcome::Rejected(Rejection::Publish(e))),
        }
    }

    /// «Send later»: queue the current preview and end the conversation.
    pub async fn schedule(&self, user_id: UserId, draft_id: &DraftId) -> Result<Outcome> {
        let draft = match self.current_draft(user_id, draft_id).await? {
            Ok(d) => d,
            Err(r) => return Ok(Outcome::Rejected(r)),
        };
        let due_in = self.cfg.send_delay;
        self.delayed.schedule(draft, due_in).await;
        self.store
            .clear_if(user_id, |s| s.draft_id() == Some(draft_id))
            .await;
        tracing::info!(
            user_id = user_id.0,
            draft_id = %draft_id,
            delay_secs = due_in.as_secs(),
            "draft scheduled"
        );
        Ok(Outcome::Accepted(Accepted::Scheduled {
            draft_id: draft_id.clone(),
            due_in,
        }))
    }

    pub async fn cancel_scheduled(&self, user_id: UserId, draft_id: &DraftId) -> Outcome {
        match self.delayed.cancel(user_id, draft_id).await {
            Some(_) => {
                self.audit
                    .record(AuditEvent::cancelled(user_id, "scheduled"));
                Outcome::Accepted(Accepted::Unscheduled)
            }
            None => Outcome::Rejected(Rejection::StaleDraft),
        }
    }

    /// Publish a draft whose delay ran out. A cooldown imposed meanwhile
    /// still applies.
    pub async fn publish_scheduled(&self, draft: &Draft) -> Result<Outcome> {
        if let Some(remaining) = self.cooldown_remaining(draft.user_id, draft.mailbox_id).await? {
            return Ok(Outcome::Rejected(Rejection::Cooldown { remaining }));
        }
        match self.publisher.publish(draft).await {
            Ok(post) => {
                self.audit_published(draft);
                Ok(Outcome::Accepted(Accepted::Published(post)))
            }
            Err(e) => Ok(Outcome::Rejected(Rejection::Publish(e))),
        }
    }

    fn audit_published(&self, draft: &Draft) {
        self.audit.record(AuditEvent::published(
            draft.user_id,
            draft.mailbox_id,
            &draft.draft_id,
            &draft.pseudonym,
            &draft.text,
        ));
    }

    pub async fn cancel(&self, user_id: UserId) -> Outcome {
        let previous = self.store.clear(user_id).await;
        if previous != PhaseKind::Idle {
            self.audit
                .record(AuditEvent::cancelled(user_id, &previous.to_string()));
        }
        Outcome::Accepted(Accepted::Cancelled { previous })
    }

    /// Cancel only if `draft_id` is still the current preview.
    pub async fn cancel_draft(&self, user_id: UserId, draft_id: &DraftId) -> Outcome {
        let state = self.store.get(user_id).await;
        if state.draft_id() != Some(draft_id) {
            return Outcome::Rejected(Rejection::StaleDraft);
        }
        self.cancel(user_id).await
    }

    pub async fn state(&self, user_id: UserId) -> ConversationState {
        self.store.get(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        domain::ChannelRef,
        ports::{Cooldown, NewMailbox, Storage, WordBlock},
        testing::{harness, harness_with, CHANNEL},
    };

    const USER: UserId = UserId(42);
    const CHAT: ChatId = ChatId(42);

    async fn to_preview(c: &Composer) -> DraftId {
        c.auto_compose(USER, CHAT, "Hello").await.unwrap();
        match c.choose_ttl(USER, "1h").await.unwrap() {
            Outcome::Accepted(Accepted::Preview { draft_id, .. }) => draft_id,
            other => panic!("expected preview, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn free_text_starts_a_draft_awaiting_ttl() {
        let h = harness().await;
        let out = h.core.composer.auto_compose(USER, CHAT, "Hello").await.unwrap();
        match out {
            Outcome::Accepted(Accepted::AwaitingTtl {
                draft_text,
                pseudonym,
            }) => {
                assert_eq!(draft_text, "Hello");
                assert_eq!(pseudonym, "Quiet Otter");
            }
            other => panic!("unexpected {other:?}"),
        }
        let state = h.core.composer.state(USER).await;
        assert_eq!(state.kind(), PhaseKind::AwaitingTtl);
        assert_eq!(state.mailbox_id, Some(h.mailbox.id));
    }

    #[tokio::test]
    async fn too_long_text_is_rejected_without_changing_phase() {
        let h = harness().await;
        let c = &h.core.composer;
        let long = "x".repeat(51);

        let out = c.auto_compose(USER, CHAT, &long).await.unwrap();
        assert!(matches!(
            out,
            Outcome::Rejected(Rejection::Invalid(Invalid::TooLong { len: 51, max: 50 }))
        ));
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);

        c.begin(USER, CHAT).await.unwrap();
        let out = c.submit_text(USER, &long).await.unwrap();
        assert!(!out.is_accepted());
        assert_eq!(c.state(USER).await.kind(), PhaseKind::AwaitingText);

        let out = c.submit_text(USER, "   ").await.unwrap();
        assert!(matches!(out, Outcome::Rejected(Rejection::Invalid(Invalid::Empty))));
    }

    #[tokio::test]
    async fn unlisted_ttl_is_rejected() {
        let h = harness().await;
        let c = &h.core.composer;
        c.auto_compose(USER, CHAT, "Hello").await.unwrap();

        let out = c.choose_ttl(USER, "999d").await.unwrap();
        assert!(matches!(
            out,
            Outcome::Rejected(Rejection::Invalid(Invalid::UnknownTtl(ref t))) if t == "999d"
        ));
        assert_eq!(c.state(USER).await.kind(), PhaseKind::AwaitingTtl);
    }

    #[tokio::test]
    async fn steps_out_of_order_are_wrong_phase() {
        let h = harness().await;
        let c = &h.core.composer;
        assert!(matches!(
            c.submit_text(USER, "hi").await.unwrap(),
            Outcome::Rejected(Rejection::WrongPhase(PhaseKind::Idle))
        ));
        assert!(matches!(
            c.choose_ttl(USER, "1h").await.unwrap(),
            Outcome::Rejected(Rejection::WrongPhase(PhaseKind::Idle))
        ));
        let id = DraftId::generate();
        assert!(matches!(
            c.confirm(USER, &id).await.unwrap(),
            Outcome::Rejected(Rejection::WrongPhase(PhaseKind::Idle))
        ));
    }

    #[tokio::test]
    async fn full_flow_persists_text_and_ttl_as_entered() {
        let h = harness().await;
        let c = &h.core.composer;
        c.begin(USER, CHAT).await.unwrap();
        c.submit_text(USER, "Dear <b>you</b> & me").await.unwrap();
        let draft_id = match c.choose_ttl(USER, "6h").await.unwrap() {
            Outcome::Accepted(Accepted::Preview { draft_id, ttl, .. }) => {
                assert_eq!(ttl.label, "6h");
                draft_id
            }
            other => panic!("unexpected {other:?}"),
        };

        let out = c.confirm(USER, &draft_id).await.unwrap();
        assert!(matches!(out, Outcome::Accepted(Accepted::Published(_))));
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);

        let rec = h.core.storage.post(&draft_id).await.unwrap().unwrap();
        assert_eq!(rec.text, "Dear <b>you</b> & me");
        assert_eq!(rec.ttl_secs, 6 * 3600);
        assert_eq!(rec.author_id, USER);
        assert_eq!(h.messenger.sent_to(CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn cancel_returns_to_idle_from_every_phase() {
        let h = harness().await;
        let c = &h.core.composer;

        c.begin(USER, CHAT).await.unwrap();
        assert!(matches!(
            c.cancel(USER).await,
            Outcome::Accepted(Accepted::Cancelled {
                previous: PhaseKind::AwaitingText
            })
        ));

        c.auto_compose(USER, CHAT, "Hello").await.unwrap();
        c.cancel(USER).await;
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);

        to_preview(c).await;
        assert!(matches!(
            c.cancel(USER).await,
            Outcome::Accepted(Accepted::Cancelled {
                previous: PhaseKind::Preview
            })
        ));
        assert!(matches!(
            c.cancel(USER).await,
            Outcome::Accepted(Accepted::Cancelled {
                previous: PhaseKind::Idle
            })
        ));
    }

    #[tokio::test]
    async fn stale_draft_buttons_are_rejected() {
        let h = harness().await;
        let c = &h.core.composer;
        let old = to_preview(c).await;
        let current = to_preview(c).await;
        assert_ne!(old, current);

        assert!(matches!(
            c.confirm(USER, &old).await.unwrap(),
            Outcome::Rejected(Rejection::StaleDraft)
        ));
        assert!(matches!(
            c.cancel_draft(USER, &old).await,
            Outcome::Rejected(Rejection::StaleDraft)
        ));
        assert_eq!(c.state(USER).await.draft_id(), Some(&current));
        assert!(h.messenger.sent_to(CHANNEL).is_empty());

        assert!(c.cancel_draft(USER, &current).await.is_accepted());
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);
    }

    #[tokio::test]
    async fn failed_publish_keeps_preview_for_retry() {
        let h = harness().await;
        let c = &h.core.composer;
        let draft_id = to_preview(c).await;
        h.messenger.fail_next(CHANNEL, 1);

        let out = c.confirm(USER, &draft_id).await.unwrap();
        assert!(matches!(out, Outcome::Rejected(Rejection::Publish(_))));
        assert_eq!(c.state(USER).await.draft_id(), Some(&draft_id));

        let out = c.confirm(USER, &draft_id).await.unwrap();
        assert!(out.is_accepted());
        assert_eq!(
            h.core.storage.posts_in_mailbox(h.mailbox.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn rate_limit_applies_to_new_drafts() {
        let mut cfg = test_config();
        cfg.rate_limit_requests = 1;
        let h = harness_with(cfg).await;
        let c = &h.core.composer;

        assert!(c.auto_compose(USER, CHAT, "one").await.unwrap().is_accepted());
        c.cancel(USER).await;
        assert!(matches!(
            c.auto_compose(USER, CHAT, "two").await.unwrap(),
            Outcome::Rejected(Rejection::RateLimited)
        ));
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);
    }

    #[tokio::test]
    async fn no_mailbox_when_several_exist_and_none_chosen() {
        let h = harness().await;
        h.storage
            .create_mailbox(NewMailbox {
                title: "Second".to_string(),
                channel_id: ChatId(-100_777),
                channel: ChannelRef::Id(ChatId(-100_777)),
                creator_id: None,
            })
            .await
            .unwrap();

        let c = &h.core.composer;
        assert!(matches!(
            c.begin(USER, CHAT).await.unwrap(),
            Outcome::Rejected(Rejection::NoMailbox)
        ));
        h.storage.set_active_mailbox(USER, h.mailbox.id).await.unwrap();
        assert!(c.begin(USER, CHAT).await.unwrap().is_accepted());
    }

    async fn cool_down(h: &crate::testing::Harness, secs: i64) {
        h.storage
            .set_cooldown(Cooldown {
                user_id: USER,
                mailbox_id: Some(h.mailbox.id),
                until: Utc::now().timestamp() + secs,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn blocked_word_discards_the_draft() {
        let h = harness().await;
        h.storage
            .add_word_block(WordBlock {
                word: "casino".to_string(),
                mailbox_id: Some(h.mailbox.id),
                reason: Some("ads".to_string()),
                created_by: UserId(1),
                expires_at: None,
            })
            .await
            .unwrap();
        let c = &h.core.composer;

        c.begin(USER, CHAT).await.unwrap();
        let out = c.submit_text(USER, "Best Casino in town").await.unwrap();
        assert!(matches!(
            out,
            Outcome::Rejected(Rejection::Blocked { ref word, ref reason })
                if word == "casino" && reason.as_deref() == Some("ads")
        ));
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);

        assert!(c.auto_compose(USER, CHAT, "casinos differ").await.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn cooldown_stops_new_drafts_and_pending_previews() {
        let h = harness().await;
        let c = &h.core.composer;
        let draft_id = to_preview(c).await;

        cool_down(&h, 3600).await;
        let out = c.confirm(USER, &draft_id).await.unwrap();
        assert!(matches!(
            out,
            Outcome::Rejected(Rejection::Cooldown { remaining }) if remaining.as_secs() > 3500
        ));
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);
        assert!(h.messenger.sent_to(CHANNEL).is_empty());

        assert!(matches!(
            c.auto_compose(USER, CHAT, "again").await.unwrap(),
            Outcome::Rejected(Rejection::Cooldown { .. })
        ));

        h.storage.clear_cooldowns(USER, None).await.unwrap();
        assert!(c.auto_compose(USER, CHAT, "again").await.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn send_later_queues_the_draft_and_ends_the_conversation() {
        let h = harness().await;
        let c = &h.core.composer;
        let draft_id = to_preview(c).await;

        let out = c.schedule(USER, &draft_id).await.unwrap();
        assert!(matches!(
            out,
            Outcome::Accepted(Accepted::Scheduled { draft_id: ref id, due_in })
                if *id == draft_id && due_in == Duration::from_secs(120)
        ));
        assert_eq!(c.state(USER).await.kind(), PhaseKind::Idle);
        assert_eq!(h.core.delayed.pending_for(USER).await, 1);
        assert!(h.messenger.sent_to(CHANNEL).is_empty());

        // The preview is gone, so its buttons are stale now.
        assert!(!c.confirm(USER, &draft_id).await.unwrap().is_accepted());

        assert!(matches!(
            c.cancel_scheduled(UserId(7), &draft_id).await,
            Outcome::Rejected(Rejection::StaleDraft)
        ));
        assert!(matches!(
            c.cancel_scheduled(USER, &draft_id).await,
            Outcome::Accepted(Accepted::Unscheduled)
        ));
        assert_eq!(h.core.delayed.len().await, 0);
    }

    #[tokio::test]
    async fn scheduled_draft_respects_a_later_cooldown() {
        let h = harness().await;
        let c = &h.core.composer;
        let draft_id = to_preview(c).await;
        c.schedule(USER, &draft_id).await.unwrap();
        let mut due = h.core.delayed.take_due().await;
        assert!(due.is_empty());

        // Pull the draft out by withdrawing and re-queuing it with no delay.
        let draft = h.core.delayed.cancel(USER, &draft_id).await.unwrap();
        h.core.delayed.schedule(draft, Duration::ZERO).await;
        due = h.core.delayed.take_due().await;
        assert_eq!(due.len(), 1);

        cool_down(&h, 600).await;
        assert!(matches!(
            c.publish_scheduled(&due[0]).await.unwrap(),
            Outcome::Rejected(Rejection::Cooldown { .. })
        ));
        h.storage.clear_cooldowns(USER, None).await.unwrap();
        match c.publish_scheduled(&due[0]).await.unwrap() {
            Outcome::Accepted(Accepted::Published(post)) => assert_eq!(post.draft_id, draft_id),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.messenger.sent_to(CHANNEL).len(), 1);
    }
}
