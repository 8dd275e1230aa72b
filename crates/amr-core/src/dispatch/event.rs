//! Inbound events and their classification.

use crate::{
    callbacks::Callback,
    domain::{ChatId, UpdateId, UserId},
    formatting::MenuButton,
    messaging::types::{ChatInfo, ChatKind},
};

/// Platform-neutral update, built by the adapter from whatever it receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub update_id: UpdateId,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub text: Option<String>,
    pub callback_data: Option<String>,
    pub callback_id: Option<String>,
    /// Origin chat when the message was forwarded.
    pub forwarded_from: Option<ChatInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/start`, with the deep-link payload if any.
    Start(Option<String>),
    Help,
    Cancel,
    End,
    Debug,
    Status,
    ResetBreakers,
    /// Moderation commands keep their raw arguments.
    Block(Option<String>),
    Unblock(Option<String>),
    Blocks,
    Cooldown(Option<String>),
    Uncooldown(Option<String>),
    Other(String),
}

impl Command {
    pub fn is_moderation(&self) -> bool {
        matches!(
            self,
            Self::Block(_) | Self::Unblock(_) | Self::Blocks | Self::Cooldown(_) | Self::Uncooldown(_)
        )
    }
}

impl Command {
    /// Parse `/cmd@botname args`. Returns `None` for anything that is not a
    /// command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts
            .next()
            .unwrap_or("")
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if name.is_empty() {
            return None;
        }
        let args = parts.next().map(str::trim).filter(|s| !s.is_empty());

        Some(match name.as_str() {
            "start" => Self::Start(args.map(str::to_string)),
            "help" => Self::Help,
            "cancel" => Self::Cancel,
            "end" => Self::End,
            "debug" => Self::Debug,
            "status" => Self::Status,
            "reset_breakers" => Self::ResetBreakers,
            "block" => Self::Block(args.map(str::to_string)),
            "unblock" => Self::Unblock(args.map(str::to_string)),
            "blocks" => Self::Blocks,
            "cooldown" => Self::Cooldown(args.map(str::to_string)),
            "uncooldown" => Self::Uncooldown(args.map(str::to_string)),
            _ => Self::Other(name),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Command(Command),
    Callback(Callback),
    MenuButton(MenuButton),
    /// A message forwarded from a channel.
    Forwarded(ChatInfo),
    /// Plain text: not a command, menu label or forward.
    Text(String),
    Unsupported,
}

impl EventKind {
    pub fn classify(event: &InboundEvent) -> Self {
        if let Some(data) = &event.callback_data {
            return Callback::parse(data).map_or(Self::Unsupported, Self::Callback);
        }
        if let Some(origin) = &event.forwarded_from {
            return match origin.kind {
                ChatKind::Channel => Self::Forwarded(origin.clone()),
                _ => Self::Unsupported,
            };
        }
        let Some(text) = event.text.as_deref() else {
            return Self::Unsupported;
        };
        if let Some(cmd) = Command::parse(text) {
            return Self::Command(cmd);
        }
        if let Some(button) = MenuButton::from_label(text) {
            return Self::MenuButton(button);
        }
        Self::Text(text.to_string())
    }

    pub fn command(&self) -> Option<&Command> {
        match self {
            Self::Command(c) => Some(c),
            _ => None,
        }
    }

    pub fn callback(&self) -> Option<&Callback> {
        match self {
            Self::Callback(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::DraftId, testing};

    #[test]
    fn command_parsing_strips_bot_suffix_and_keeps_payload() {
        assert_eq!(
            Command::parse("/start@amr_bot 42"),
            Some(Command::Start(Some("42".to_string())))
        );
        assert_eq!(Command::parse("/start   "), Some(Command::Start(None)));
        assert_eq!(Command::parse("/RESET_BREAKERS"), Some(Command::ResetBreakers));
        assert_eq!(Command::parse("/foo"), Some(Command::Other("foo".to_string())));
        assert_eq!(
            Command::parse("/cooldown 2h Quiet Otter"),
            Some(Command::Cooldown(Some("2h Quiet Otter".to_string())))
        );
        assert_eq!(Command::parse("/block"), Some(Command::Block(None)));
        assert!(Command::parse("/blocks").unwrap().is_moderation());
        assert_eq!(Command::parse("/"), None);
        assert_eq!(Command::parse("hello /start"), None);
    }

    #[test]
    fn classification_prefers_callbacks_then_forwards() {
        let ev = testing::callback(5, "draft:send:abc");
        assert_eq!(
            EventKind::classify(&ev),
            EventKind::Callback(Callback::SendDraft(DraftId("abc".to_string())))
        );
        assert_eq!(
            EventKind::classify(&testing::callback(5, "garbage")),
            EventKind::Unsupported
        );

        let channel = ChatInfo {
            id: ChatId(-100),
            kind: ChatKind::Channel,
            title: None,
            username: None,
        };
        let ev = testing::forwarded(5, channel.clone());
        assert_eq!(EventKind::classify(&ev), EventKind::Forwarded(channel));

        let person = ChatInfo {
            id: ChatId(9),
            kind: ChatKind::Private,
            title: None,
            username: None,
        };
        assert_eq!(
            EventKind::classify(&testing::forwarded(5, person)),
            EventKind::Unsupported
        );
    }

    #[test]
    fn menu_labels_and_commands_are_not_text() {
        assert_eq!(
            EventKind::classify(&testing::text(5, MenuButton::Compose.label())),
            EventKind::MenuButton(MenuButton::Compose)
        );
        assert_eq!(
            EventKind::classify(&testing::text(5, "/cancel")),
            EventKind::Command(Command::Cancel)
        );
        assert!(EventKind::classify(&testing::text(5, "Hello")).is_text());
    }
}
