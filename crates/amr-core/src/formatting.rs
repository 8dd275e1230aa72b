//! Rendering of user-visible HTML and keyboards.

use chrono::{DateTime, FixedOffset, Utc};

use crate::{
    callbacks::Callback,
    config::TtlChoice,
    domain::{DraftId, MailboxId},
    messaging::types::{InlineButton, InlineKeyboard, ReplyMenu},
    ports::Mailbox,
};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

/// Labels of the persistent reply keyboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuButton {
    Compose,
    Mailboxes,
    Help,
}

impl MenuButton {
    pub const ALL: [MenuButton; 3] = [Self::Compose, Self::Mailboxes, Self::Help];

    pub fn label(self) -> &'static str {
        match self {
            Self::Compose => "✍️ Write a letter",
            Self::Mailboxes => "📬 Mailboxes",
            Self::Help => "ℹ️ Help",
        }
    }

    pub fn from_label(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL.into_iter().find(|b| b.label() == text)
    }
}

pub fn main_menu() -> ReplyMenu {
    ReplyMenu {
        rows: vec![
            vec![MenuButton::Compose.label().to_string()],
            vec![
                MenuButton::Mailboxes.label().to_string(),
                MenuButton::Help.label().to_string(),
            ],
        ],
    }
}

pub fn format_expiry(delete_at: DateTime<Utc>, offset_minutes: i32) -> String {
    const FMT: &str = "%H:%M, %d.%m";
    let when = match FixedOffset::east_opt(offset_minutes.saturating_mul(60)) {
        Some(offset) => delete_at.with_timezone(&offset).format(FMT).to_string(),
        None => delete_at.format(FMT).to_string(),
    };
    format!("🕒 deleted at {when}")
}

/// Link that binds whoever opens it to `mailbox_id`.
pub fn deep_link(bot_username: Option<&str>, mailbox_id: MailboxId) -> String {
    match bot_username {
        Some(name) => format!("https://t.me/{name}?start={mailbox_id}"),
        None => format!("/start {mailbox_id}"),
    }
}

/// Channel post body: text, pseudonym in bold, expiry line.
pub fn render_post(
    text: &str,
    pseudonym: &str,
    delete_at: DateTime<Utc>,
    offset_minutes: i32,
) -> String {
    format!(
        "{}\n\n<b>{}</b>\n{}",
        escape_html(text),
        escape_html(pseudonym),
        format_expiry(delete_at, offset_minutes)
    )
}

pub fn render_ttl_prompt(text: &str, pseudonym: &str) -> String {
    format!(
        "{}\n\n<b>{}</b>\n\n⏳ How long should the letter stay up?",
        escape_html(text),
        escape_html(pseudonym)
    )
}

pub fn render_preview(text: &str, pseudonym: &str, ttl: &TtlChoice) -> String {
    format!(
        "👀 <b>Preview</b>\n\n{}\n\n<b>{}</b>\n⏳ {}",
        escape_html(text),
        escape_html(pseudonym),
        escape_html(&ttl.label)
    )
}

pub fn render_relay_message(alias: &str, text: &str) -> String {
    format!("<b>{}</b>:\n{}", escape_html(alias), escape_html(text))
}

pub fn ttl_keyboard(ttls: &[TtlChoice]) -> InlineKeyboard {
    let buttons = ttls
        .iter()
        .map(|t| InlineButton::new(t.label.clone(), Callback::Ttl(t.label.clone()).to_string()))
        .collect();
    InlineKeyboard::chunked(buttons, 3)
}

pub fn preview_keyboard(draft_id: &DraftId) -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![
            InlineButton::new("📨 Send", Callback::SendDraft(draft_id.clone()).to_string()),
            InlineButton::new("⏰ Send later", Callback::DelayDraft(draft_id.clone()).to_string()),
        ],
        vec![InlineButton::new(
            "🗑 Cancel",
            Callback::CancelDraft(draft_id.clone()).to_string(),
        )],
    ])
}

pub fn delayed_keyboard(draft_id: &DraftId) -> InlineKeyboard {
    InlineKeyboard::new(vec![vec![InlineButton::new(
        "↩️ Don't send",
        Callback::CancelDelayed(draft_id.clone()).to_string(),
    )]])
}

/// Buttons under a channel post: contact, then one extend button per option.
pub fn post_keyboard(draft_id: &DraftId, extend: &[TtlChoice]) -> InlineKeyboard {
    let mut rows = vec![vec![InlineButton::new(
        "💬 Contact author",
        Callback::ContactAuthor(draft_id.clone()).to_string(),
    )]];
    if !extend.is_empty() {
        rows.push(
            extend
                .iter()
                .map(|t| {
                    InlineButton::new(
                        format!("⏳ +{}", t.label),
                        Callback::ExtendPost {
                            draft_id: draft_id.clone(),
                            label: t.label.clone(),
                        }
                        .to_string(),
                    )
                })
                .collect(),
        );
    }
    InlineKeyboard::new(rows)
}

pub fn mailbox_keyboard(mailboxes: &[Mailbox]) -> InlineKeyboard {
    let buttons = mailboxes
        .iter()
        .map(|m| {
            InlineButton::new(
                truncate_text(&m.title, 40),
                Callback::SelectMailbox(m.id).to_string(),
            )
        })
        .collect();
    InlineKeyboard::chunked(buttons, 1)
}
