//! Collaborator ports consumed by the core.
//!
//! Implementations live in `storage` / `pseudonym` (defaults) or in adapter
//! crates. The transport port is `messaging::port::MessagingPort`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChannelRef, ChatId, DraftId, MailboxId, MessageRef, UserId},
    Result,
};

/// A destination channel that accepts anonymous posts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: MailboxId,
    pub title: String,
    pub channel_id: ChatId,
    pub channel: ChannelRef,
    pub creator_id: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct NewMailbox {
    pub title: String,
    pub channel_id: ChatId,
    pub channel: ChannelRef,
    pub creator_id: Option<UserId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostStatus {
    /// Persisted, not yet confirmed by the transport.
    Pending,
    Published,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub draft_id: DraftId,
    pub mailbox_id: MailboxId,
    pub author_id: UserId,
    pub pseudonym: String,
    pub text: String,
    pub ttl_secs: u64,
    pub status: PostStatus,
    pub message: Option<MessageRef>,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; set once published. Includes every reader extension.
    pub delete_at: Option<i64>,
    #[serde(default)]
    pub extensions: Vec<Extension>,
}

/// Time one reader added to a post with an extend button. A reader holds at
/// most one extension per label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub user_id: UserId,
    pub label: String,
    pub secs: u64,
}

/// A word writers may not use. `mailbox_id: None` applies everywhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBlock {
    /// Normalized, see [`crate::moderation::normalize_word`].
    pub word: String,
    pub mailbox_id: Option<MailboxId>,
    pub reason: Option<String>,
    pub created_by: UserId,
    /// Unix seconds; `None` never expires.
    pub expires_at: Option<i64>,
}

impl WordBlock {
    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A writer barred from composing until `until` (unix seconds).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    pub user_id: UserId,
    /// `None` applies to every mailbox.
    pub mailbox_id: Option<MailboxId>,
    pub until: i64,
}

/// Persistence collaborator.
///
/// `upsert_post` must be idempotent per `draft_id`: the publish pipeline relies
/// on it so retries never create a second record.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn mailbox(&self, id: MailboxId) -> Result<Option<Mailbox>>;
    async fn mailbox_by_channel(&self, channel_id: ChatId) -> Result<Option<Mailbox>>;
    async fn mailboxes(&self) -> Result<Vec<Mailbox>>;
    async fn create_mailbox(&self, new: NewMailbox) -> Result<Mailbox>;

    async fn upsert_post(&self, post: PostRecord) -> Result<()>;
    async fn post(&self, draft_id: &DraftId) -> Result<Option<PostRecord>>;
    /// Returns whether a record was removed.
    async fn delete_post(&self, draft_id: &DraftId) -> Result<bool>;
    async fn posts_in_mailbox(&self, mailbox_id: MailboxId) -> Result<Vec<PostRecord>>;
    /// Published posts whose `delete_at` is at or before `now` (unix seconds).
    async fn expired_posts(&self, now: i64) -> Result<Vec<PostRecord>>;

    async fn active_mailbox(&self, user_id: UserId) -> Result<Option<MailboxId>>;
    async fn set_active_mailbox(&self, user_id: UserId, mailbox_id: MailboxId) -> Result<()>;

    /// Unexpired blocks that apply to `mailbox_id`: its own plus the global ones.
    async fn word_blocks(&self, mailbox_id: MailboxId, now: i64) -> Result<Vec<WordBlock>>;
    /// Replaces an existing block of the same word and scope.
    async fn add_word_block(&self, block: WordBlock) -> Result<()>;
    async fn remove_word_block(&self, word: &str, mailbox_id: Option<MailboxId>) -> Result<bool>;

    /// Unexpired cooldowns of `user_id` that apply to `mailbox_id`.
    async fn cooldowns(&self, user_id: UserId, mailbox_id: MailboxId, now: i64)
        -> Result<Vec<Cooldown>>;
    /// Replaces the user's cooldown for the same scope.
    async fn set_cooldown(&self, cooldown: Cooldown) -> Result<()>;
    /// Lift the user's cooldowns for `mailbox_id` (every scope when `None`).
    /// Returns how many were lifted.
    async fn clear_cooldowns(&self, user_id: UserId, mailbox_id: Option<MailboxId>) -> Result<usize>;

    /// Drop expired word blocks and cooldowns. Returns how many were dropped.
    async fn purge_moderation(&self, now: i64) -> Result<usize>;
}

/// Pseudonym collaborator. Callers go through
/// [`crate::pseudonym::pseudonym_or_placeholder`], which never fails.
#[async_trait]
pub trait PseudonymGenerator: Send + Sync {
    async fn generate(&self, user_id: UserId, mailbox_id: MailboxId) -> Result<String>;
}

/// Resolves the mailbox a user is currently writing to.
///
/// `Ok(None)` is a valid answer meaning "no session": the user is routed to
/// onboarding.
#[async_trait]
pub trait SessionContext: Send + Sync {
    async fn active_mailbox(&self, user_id: UserId, chat_id: ChatId) -> Result<Option<MailboxId>>;
}
