use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Channels use the `-100…` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Platform update id, used to drop replays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UpdateId(pub i64);

/// Mailbox (destination channel) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MailboxId(pub i64);

/// Identity of one draft, generated once when the TTL is chosen and used as the
/// persistence upsert key for every publish attempt of that draft.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftId(pub String);

impl DraftId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// A private chat with a user has the user's id.
impl From<UserId> for ChatId {
    fn from(user: UserId) -> Self {
        ChatId(user.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A channel reference, normalized exactly once at the system boundary.
///
/// Accepts `@name`, `name`, `https://t.me/name` and numeric ids. After parsing,
/// usernames never carry the `@` prefix; rendering adds it back where needed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRef {
    Id(ChatId),
    Username(String),
}

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{3,31}$").expect("valid regex"))
}

impl ChannelRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if let Ok(n) = s.parse::<i64>() {
            return Some(Self::Id(ChatId(n)));
        }

        let s = s
            .strip_prefix("https://t.me/")
            .or_else(|| s.strip_prefix("http://t.me/"))
            .or_else(|| s.strip_prefix("t.me/"))
            .unwrap_or(s);
        let s = s.trim_start_matches('@').trim_end_matches('/');

        if username_re().is_match(s) {
            Some(Self::Username(s.to_string()))
        } else {
            None
        }
    }

    /// Public link to a message in this channel.
    pub fn post_link(&self, message_id: MessageId) -> String {
        match self {
            Self::Username(name) => format!("https://t.me/{name}/{}", message_id.0),
            Self::Id(ChatId(id)) => {
                let raw = id.to_string();
                let internal = raw.strip_prefix("-100").unwrap_or(raw.trim_start_matches('-'));
                format!("https://t.me/c/{internal}/{}", message_id.0)
            }
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id.0),
            Self::Username(name) => write!(f, "@{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ref_strips_prefix_exactly_once() {
        let a = ChannelRef::parse("@angry_letters").unwrap();
        let b = ChannelRef::parse("@@angry_letters").unwrap();
        let c = ChannelRef::parse("https://t.me/angry_letters/").unwrap();
        assert_eq!(a, ChannelRef::Username("angry_letters".to_string()));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_string(), "@angry_letters");
    }

    #[test]
    fn channel_ref_numeric_ids_and_links() {
        let id = ChannelRef::parse("-1001234567890").unwrap();
        assert_eq!(id, ChannelRef::Id(ChatId(-1001234567890)));
        assert_eq!(
            id.post_link(MessageId(42)),
            "https://t.me/c/1234567890/42"
        );
        let name = ChannelRef::parse("letters").unwrap();
        assert_eq!(name.post_link(MessageId(7)), "https://t.me/letters/7");
    }

    #[test]
    fn channel_ref_rejects_garbage() {
        assert!(ChannelRef::parse("").is_none());
        assert!(ChannelRef::parse("@a b").is_none());
        assert!(ChannelRef::parse("@1abc").is_none());
    }

    #[test]
    fn draft_ids_are_unique() {
        assert_ne!(DraftId::generate(), DraftId::generate());
    }
}
