//! Default persistence collaborator: in-memory tables with an optional JSON
//! snapshot file, rewritten atomically (temp file + rename) after each mutation.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, DraftId, MailboxId, UserId},
    errors::Error,
    ports::{
        Cooldown, Mailbox, NewMailbox, PostRecord, PostStatus, SessionContext, Storage, WordBlock,
    },
    Result,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    next_mailbox_id: i64,
    mailboxes: Vec<Mailbox>,
    posts: HashMap<String, PostRecord>,
    active: HashMap<i64, MailboxId>,
    #[serde(default)]
    word_blocks: Vec<WordBlock>,
    #[serde(default)]
    cooldowns: Vec<Cooldown>,
}

pub struct MemoryStorage {
    tables: Mutex<Tables>,
    snapshot: Option<PathBuf>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            snapshot: None,
        }
    }

    /// Open a snapshot-backed store. A missing file starts empty; an unreadable
    /// one is an error so data is never silently replaced.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = match tokio::fs::read_to_string(&path).await {
            Ok(txt) => serde_json::from_str::<Tables>(&txt)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(Error::Io(e)),
        };
        tracing::info!(
            path = %path.display(),
            mailboxes = tables.mailboxes.len(),
            posts = tables.posts.len(),
            "storage snapshot loaded"
        );
        Ok(Self {
            tables: Mutex::new(tables),
            snapshot: Some(path),
        })
    }

    /// Apply `change` to a copy of the tables and swap it in only once the
    /// snapshot write succeeded, so a failed write leaves memory untouched.
    async fn mutate<R>(&self, change: impl FnOnce(&mut Tables) -> R) -> Result<R> {
        let mut t = self.tables.lock().await;
        if self.snapshot.is_none() {
            return Ok(change(&mut t));
        }
        let mut next = t.clone();
        let out = change(&mut next);
        self.persist(&next).await?;
        *t = next;
        Ok(out)
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        write_atomic(path, &serde_json::to_vec_pretty(tables)?)
            .await
            .map_err(|e| Error::Storage(format!("snapshot write failed: {e}")))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn mailbox(&self, id: MailboxId) -> Result<Option<Mailbox>> {
        let t = self.tables.lock().await;
        Ok(t.mailboxes.iter().find(|m| m.id == id).cloned())
    }

    async fn mailbox_by_channel(&self, channel_id: ChatId) -> Result<Option<Mailbox>> {
        let t = self.tables.lock().await;
        Ok(t.mailboxes.iter().find(|m| m.channel_id == channel_id).cloned())
    }

    async fn mailboxes(&self) -> Result<Vec<Mailbox>> {
        Ok(self.tables.lock().await.mailboxes.clone())
    }

    async fn create_mailbox(&self, new: NewMailbox) -> Result<Mailbox> {
        if let Some(existing) = self.mailbox_by_channel(new.channel_id).await? {
            return Ok(existing);
        }
        self.mutate(|t| {
            // Re-check under the write: two creates may race past the read above.
            if let Some(existing) = t.mailboxes.iter().find(|m| m.channel_id == new.channel_id) {
                return existing.clone();
            }
            t.next_mailbox_id += 1;
            let mailbox = Mailbox {
                id: MailboxId(t.next_mailbox_id),
                title: new.title,
                channel_id: new.channel_id,
                channel: new.channel,
                creator_id: new.creator_id,
            };
            t.mailboxes.push(mailbox.clone());
            mailbox
        })
        .await
    }

    async fn upsert_post(&self, post: PostRecord) -> Result<()> {
        self.mutate(|t| {
            t.posts.insert(post.draft_id.0.clone(), post);
        })
        .await
    }

    async fn post(&self, draft_id: &DraftId) -> Result<Option<PostRecord>> {
        Ok(self.tables.lock().await.posts.get(&draft_id.0).cloned())
    }

    async fn delete_post(&self, draft_id: &DraftId) -> Result<bool> {
        if self.post(draft_id).await?.is_none() {
            return Ok(false);
        }
        self.mutate(|t| t.posts.remove(&draft_id.0).is_some()).await
    }

    async fn posts_in_mailbox(&self, mailbox_id: MailboxId) -> Result<Vec<PostRecord>> {
        let t = self.tables.lock().await;
        let mut out: Vec<_> = t
            .posts
            .values()
            .filter(|p| p.mailbox_id == mailbox_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }

    async fn expired_posts(&self, now: i64) -> Result<Vec<PostRecord>> {
        let t = self.tables.lock().await;
        Ok(t.posts
            .values()
            .filter(|p| p.status == PostStatus::Published)
            .filter(|p| p.delete_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    async fn active_mailbox(&self, user_id: UserId) -> Result<Option<MailboxId>> {
        Ok(self.tables.lock().await.active.get(&user_id.0).copied())
    }

    async fn set_active_mailbox(&self, user_id: UserId, mailbox_id: MailboxId) -> Result<()> {
        self.mutate(|t| {
            t.active.insert(user_id.0, mailbox_id);
        })
        .await
    }

    async fn word_blocks(&self, mailbox_id: MailboxId, now: i64) -> Result<Vec<WordBlock>> {
        let t = self.tables.lock().await;
        Ok(t.word_blocks
            .iter()
            .filter(|b| b.mailbox_id.map_or(true, |m| m == mailbox_id))
            .filter(|b| b.is_active(now))
            .cloned()
            .collect())
    }

    async fn add_word_block(&self, block: WordBlock) -> Result<()> {
        self.mutate(|t| {
            t.word_blocks
                .retain(|b| !(b.word == block.word && b.mailbox_id == block.mailbox_id));
            t.word_blocks.push(block);
        })
        .await
    }

    async fn remove_word_block(&self, word: &str, mailbox_id: Option<MailboxId>) -> Result<bool> {
        self.mutate(|t| {
            let before = t.word_blocks.len();
            t.word_blocks
                .retain(|b| !(b.word == word && b.mailbox_id == mailbox_id));
            t.word_blocks.len() != before
        })
        .await
    }

    async fn cooldowns(
        &self,
        user_id: UserId,
        mailbox_id: MailboxId,
        now: i64,
    ) -> Result<Vec<Cooldown>> {
        let t = self.tables.lock().await;
        Ok(t.cooldowns
            .iter()
            .filter(|c| c.user_id == user_id && c.until > now)
            .filter(|c| c.mailbox_id.map_or(true, |m| m == mailbox_id))
            .cloned()
            .collect())
    }

    async fn set_cooldown(&self, cooldown: Cooldown) -> Result<()> {
        self.mutate(|t| {
            t.cooldowns.retain(|c| {
                !(c.user_id == cooldown.user_id && c.mailbox_id == cooldown.mailbox_id)
            });
            t.cooldowns.push(cooldown);
        })
        .await
    }

    async fn clear_cooldowns(&self, user_id: UserId, mailbox_id: Option<MailboxId>) -> Result<usize> {
        self.mutate(|t| {
            let before = t.cooldowns.len();
            t.cooldowns.retain(|c| {
                c.user_id != user_id || mailbox_id.is_some_and(|m| c.mailbox_id != Some(m))
            });
            before - t.cooldowns.len()
        })
        .await
    }

    async fn purge_moderation(&self, now: i64) -> Result<usize> {
        {
            let t = self.tables.lock().await;
            let stale = t.word_blocks.iter().any(|b| !b.is_active(now))
                || t.cooldowns.iter().any(|c| c.until <= now);
            if !stale {
                return Ok(0);
            }
        }
        self.mutate(|t| {
            let before = t.word_blocks.len() + t.cooldowns.len();
            t.word_blocks.retain(|b| b.is_active(now));
            t.cooldowns.retain(|c| c.until > now);
            before - t.word_blocks.len() - t.cooldowns.len()
        })
        .await
    }
}

/// Session context backed by storage: the active mailbox is whatever the user
/// last bound to, provided it still exists. With exactly one mailbox configured
/// every user writes to it.
pub struct StorageSessionContext {
    storage: Arc<dyn Storage>,
}

impl StorageSessionContext {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl SessionContext for StorageSessionContext {
    async fn active_mailbox(&self, user_id: UserId, _chat_id: ChatId) -> Result<Option<MailboxId>> {
        if let Some(id) = self.storage.active_mailbox(user_id).await? {
            if self.storage.mailbox(id).await?.is_some() {
                return Ok(Some(id));
            }
        }
        let all = self.storage.mailboxes().await?;
        match all.as_slice() {
            [only] => Ok(Some(only.id)),
            _ => Ok(None),
        }
    }
}
