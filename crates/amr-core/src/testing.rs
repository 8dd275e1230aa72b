//! In-memory fakes for the ports and a prewired `Core` for unit tests.

use std::{
    collections::{HashMap, HashSet},
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    config::{test_config, Config},
    dispatch::event::InboundEvent,
    domain::{ChannelRef, ChatId, DraftId, MailboxId, MessageId, MessageRef, UpdateId, UserId},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatInfo, ChatKind, InlineKeyboard, MessagingCapabilities, ReplyMenu},
    },
    ports::{Cooldown, Mailbox, NewMailbox, PostRecord, PseudonymGenerator, Storage, WordBlock},
    services::{Collaborators, Core},
    storage::{MemoryStorage, StorageSessionContext},
    Result,
};

pub const CHANNEL: ChatId = ChatId(-100_555);

#[derive(Clone, Debug)]
pub struct Sent {
    pub chat_id: ChatId,
    pub html: String,
    pub keyboard: Option<InlineKeyboard>,
    pub menu: Option<ReplyMenu>,
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sent: Mutex<Vec<Sent>>,
    edits: Mutex<Vec<(MessageRef, String, Option<InlineKeyboard>)>>,
    deletes: Mutex<Vec<MessageRef>>,
    answers: Mutex<Vec<(String, Option<String>)>>,
    chats: Mutex<HashMap<i64, ChatInfo>>,
    // chat id -> remaining failures (u32::MAX = until recovered)
    failing: Mutex<HashMap<i64, u32>>,
    hanging: Mutex<HashSet<i64>>,
    // chats that answer every call with a refusal (blocked bot, gone message)
    rejecting: Mutex<HashSet<i64>>,
    attempts: Mutex<HashMap<i64, usize>>,
}

impl FakeMessenger {
    pub fn fail_next(&self, chat_id: ChatId, n: u32) {
        self.failing.lock().unwrap().insert(chat_id.0, n);
    }

    pub fn fail_always(&self, chat_id: ChatId) {
        self.fail_next(chat_id, u32::MAX);
    }

    pub fn reject_always(&self, chat_id: ChatId) {
        self.rejecting.lock().unwrap().insert(chat_id.0);
    }

    pub fn recover(&self, chat_id: ChatId) {
        self.failing.lock().unwrap().remove(&chat_id.0);
        self.rejecting.lock().unwrap().remove(&chat_id.0);
        self.hanging.lock().unwrap().remove(&chat_id.0);
    }

    pub fn hang(&self, chat_id: ChatId) {
        self.hanging.lock().unwrap().insert(chat_id.0);
    }

    pub fn set_chat_info(&self, info: ChatInfo) {
        self.chats.lock().unwrap().insert(info.id.0, info);
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn last_to(&self, chat_id: ChatId) -> Option<Sent> {
        self.sent_to(chat_id).pop()
    }

    pub fn attempts_to(&self, chat_id: ChatId) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .copied()
            .unwrap_or(0)
    }

    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.answers.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String, Option<InlineKeyboard>)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deletes.lock().unwrap().clone()
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        }
    }

    async fn attempt(&self, chat_id: ChatId) -> Result<()> {
        *self.attempts.lock().unwrap().entry(chat_id.0).or_default() += 1;
        let hanging = self.hanging.lock().unwrap().contains(&chat_id.0);
        if hanging {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.rejecting.lock().unwrap().contains(&chat_id.0) {
            return Err(Error::Rejected("fake platform refusal".to_string()));
        }
        let mut failing = self.failing.lock().unwrap();
        if let Some(left) = failing.get_mut(&chat_id.0) {
            if *left != u32::MAX {
                *left -= 1;
            }
            if *left == 0 {
                failing.remove(&chat_id.0);
            }
            return Err(Error::Transport("fake transport failure".to_string()));
        }
        Ok(())
    }

    async fn record(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
        menu: Option<ReplyMenu>,
    ) -> Result<MessageRef> {
        self.attempt(chat_id).await?;
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            html: html.to_string(),
            keyboard,
            menu,
        });
        Ok(self.alloc(chat_id))
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.record(chat_id, html, None, None).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.attempt(msg.chat_id).await?;
        self.edits.lock().unwrap().push((msg, html.to_string(), None));
        Ok(())
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.attempt(msg.chat_id).await?;
        self.edits
            .lock()
            .unwrap()
            .push((msg, html.to_string(), Some(keyboard)));
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.attempt(msg.chat_id).await?;
        self.deletes.lock().unwrap().push(msg);
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.record(chat_id, html, Some(keyboard), None).await
    }

    async fn send_menu(&self, chat_id: ChatId, html: &str, menu: ReplyMenu) -> Result<MessageRef> {
        self.record(chat_id, html, None, Some(menu)).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answers
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.map(str::to_string)));
        Ok(())
    }

    async fn get_chat_info(&self, chat_id: ChatId) -> Result<ChatInfo> {
        self.chats
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("chat {} not found", chat_id.0)))
    }
}

/// `MemoryStorage` with switchable post-write failures.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_upserts: AtomicBool,
    // 1-based upsert call numbers that fail
    fail_calls: Mutex<Option<RangeInclusive<usize>>>,
    upserts: AtomicUsize,
}

impl FlakyStorage {
    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
        if !fail {
            *self.fail_calls.lock().unwrap() = None;
        }
    }

    /// Fail only the upserts whose call number falls in `calls`.
    pub fn fail_upsert_calls(&self, calls: RangeInclusive<usize>) {
        *self.fail_calls.lock().unwrap() = Some(calls);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn mailbox(&self, id: MailboxId) -> Result<Option<Mailbox>> {
        self.inner.mailbox(id).await
    }
    async fn mailbox_by_channel(&self, channel_id: ChatId) -> Result<Option<Mailbox>> {
        self.inner.mailbox_by_channel(channel_id).await
    }
    async fn mailboxes(&self) -> Result<Vec<Mailbox>> {
        self.inner.mailboxes().await
    }
    async fn create_mailbox(&self, new: NewMailbox) -> Result<Mailbox> {
        self.inner.create_mailbox(new).await
    }
    async fn upsert_post(&self, post: PostRecord) -> Result<()> {
        let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        let scheduled = self
            .fail_calls
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|r| r.contains(&call));
        if scheduled || self.fail_upserts.load(Ordering::SeqCst) {
            return Err(Error::Storage("fake storage failure".to_string()));
        }
        self.inner.upsert_post(post).await
    }
    async fn post(&self, draft_id: &DraftId) -> Result<Option<PostRecord>> {
        self.inner.post(draft_id).await
    }
    async fn delete_post(&self, draft_id: &DraftId) -> Result<bool> {
        self.inner.delete_post(draft_id).await
    }
    async fn posts_in_mailbox(&self, mailbox_id: MailboxId) -> Result<Vec<PostRecord>> {
        self.inner.posts_in_mailbox(mailbox_id).await
    }
    async fn expired_posts(&self, now: i64) -> Result<Vec<PostRecord>> {
        self.inner.expired_posts(now).await
    }
    async fn active_mailbox(&self, user_id: UserId) -> Result<Option<MailboxId>> {
        self.inner.active_mailbox(user_id).await
    }
    async fn set_active_mailbox(&self, user_id: UserId, mailbox_id: MailboxId) -> Result<()> {
        self.inner.set_active_mailbox(user_id, mailbox_id).await
    }
    async fn word_blocks(&self, mailbox_id: MailboxId, now: i64) -> Result<Vec<WordBlock>> {
        self.inner.word_blocks(mailbox_id, now).await
    }
    async fn add_word_block(&self, block: WordBlock) -> Result<()> {
        self.inner.add_word_block(block).await
    }
    async fn remove_word_block(&self, word: &str, mailbox_id: Option<MailboxId>) -> Result<bool> {
        self.inner.remove_word_block(word, mailbox_id).await
    }
    async fn cooldowns(
        &self,
        user_id: UserId,
        mailbox_id: MailboxId,
        now: i64,
    ) -> Result<Vec<Cooldown>> {
        self.inner.cooldowns(user_id, mailbox_id, now).await
    }
    async fn set_cooldown(&self, cooldown: Cooldown) -> Result<()> {
        self.inner.set_cooldown(cooldown).await
    }
    async fn clear_cooldowns(&self, user_id: UserId, mailbox_id: Option<MailboxId>) -> Result<usize> {
        self.inner.clear_cooldowns(user_id, mailbox_id).await
    }
    async fn purge_moderation(&self, now: i64) -> Result<usize> {
        self.inner.purge_moderation(now).await
    }
}

pub struct FixedPseudonym(pub &'static str);

#[async_trait]
impl PseudonymGenerator for FixedPseudonym {
    async fn generate(&self, _user_id: UserId, _mailbox_id: MailboxId) -> Result<String> {
        Ok(self.0.to_string())
    }
}

pub struct Harness {
    pub core: Arc<Core>,
    pub messenger: Arc<FakeMessenger>,
    pub storage: Arc<FlakyStorage>,
    pub mailbox: Mailbox,
}

/// Core over fakes, with one mailbox bound to [`CHANNEL`].
pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(cfg: Config) -> Harness {
    let messenger = Arc::new(FakeMessenger::default());
    let storage = Arc::new(FlakyStorage::default());
    let mailbox = storage
        .create_mailbox(NewMailbox {
            title: "Letters".to_string(),
            channel_id: CHANNEL,
            channel: ChannelRef::Username("letters_box".to_string()),
            creator_id: Some(UserId(1)),
        })
        .await
        .unwrap();
    messenger.set_chat_info(ChatInfo {
        id: CHANNEL,
        kind: ChatKind::Channel,
        title: Some("Letters".to_string()),
        username: Some("letters_box".to_string()),
    });

    let storage_port: Arc<dyn Storage> = storage.clone();
    let core = Core::new(
        Arc::new(cfg),
        Collaborators {
            messenger: messenger.clone(),
            storage: storage_port.clone(),
            session: Arc::new(StorageSessionContext::new(storage_port)),
            pseudonyms: Arc::new(FixedPseudonym("Quiet Otter")),
        },
    );
    Harness {
        core,
        messenger,
        storage,
        mailbox,
    }
}

static NEXT_UPDATE: AtomicI64 = AtomicI64::new(1);

fn event(user: i64) -> InboundEvent {
    InboundEvent {
        update_id: UpdateId(NEXT_UPDATE.fetch_add(1, Ordering::Relaxed)),
        user_id: UserId(user),
        chat_id: ChatId(user),
        text: None,
        callback_data: None,
        callback_id: None,
        forwarded_from: None,
    }
}

pub fn text(user: i64, text: &str) -> InboundEvent {
    InboundEvent {
        text: Some(text.to_string()),
        ..event(user)
    }
}

pub fn callback(user: i64, data: &str) -> InboundEvent {
    InboundEvent {
        callback_data: Some(data.to_string()),
        callback_id: Some(format!("cb-{user}")),
        ..event(user)
    }
}

pub fn forwarded(user: i64, from: ChatInfo) -> InboundEvent {
    InboundEvent {
        text: Some("forwarded post".to_string()),
        forwarded_from: Some(from),
        ..event(user)
    }
}
