//! The default rule table. Order is part of the contract: a lower number is
//! offered the event first.

use crate::{
    callbacks::Callback,
    conversation::PhaseKind,
    formatting::MenuButton,
};

use super::{
    event::{Command, EventKind},
    handlers::{
        admin::Admin,
        bind::DeepLink,
        channel::ChannelCallback,
        compose::{AutoCompose, ComposeButton, DraftText, PreviewAction, TtlSelected},
        diagnostic::Diagnostic,
        discovery::ChannelDiscovery,
        lifecycle::Lifecycle,
        moderation::Moderation,
        relay::{EndRelay, Passthrough},
    },
    DispatchRule, Routed,
};

pub fn default_rules() -> Vec<DispatchRule> {
    vec![
        DispatchRule::new("admin", 10, is_admin_command, Admin),
        DispatchRule::new("moderation", 11, is_moderation_command, Moderation),
        DispatchRule::new("lifecycle", 20, is_lifecycle, Lifecycle),
        DispatchRule::new("deep_link", 30, is_deep_link, DeepLink),
        DispatchRule::new("compose_button", 40, is_compose_button, ComposeButton),
        DispatchRule::new("compose_text", 41, is_draft_text, DraftText),
        DispatchRule::new("ttl_choice", 42, is_ttl_choice, TtlSelected),
        DispatchRule::new("preview_action", 43, is_preview_action, PreviewAction),
        DispatchRule::new("relay_end", 50, is_end, EndRelay),
        DispatchRule::new("relay_passthrough", 51, is_relay_text, Passthrough),
        DispatchRule::new("channel_callback", 60, is_channel_callback, ChannelCallback),
        DispatchRule::new("channel_discovery", 70, is_admin_forward, ChannelDiscovery),
        DispatchRule::new("diagnostic", 80, is_debug, Diagnostic),
        DispatchRule::new("auto_compose", 90, is_free_text, AutoCompose),
    ]
}

fn is_admin_command(r: &Routed) -> bool {
    r.is_admin
        && matches!(
            r.kind.command(),
            Some(Command::Status | Command::ResetBreakers)
        )
}

fn is_moderation_command(r: &Routed) -> bool {
    r.is_admin && r.kind.command().is_some_and(Command::is_moderation)
}

fn is_lifecycle(r: &Routed) -> bool {
    matches!(
        r.kind,
        EventKind::Command(Command::Start(None) | Command::Help | Command::Cancel)
            | EventKind::MenuButton(MenuButton::Help | MenuButton::Mailboxes)
    )
}

fn is_deep_link(r: &Routed) -> bool {
    matches!(r.kind.command(), Some(Command::Start(Some(_))))
}

fn is_compose_button(r: &Routed) -> bool {
    r.kind == EventKind::MenuButton(MenuButton::Compose)
}

fn is_draft_text(r: &Routed) -> bool {
    r.kind.is_text() && r.state.kind() == PhaseKind::AwaitingText
}

fn is_ttl_choice(r: &Routed) -> bool {
    matches!(r.kind.callback(), Some(Callback::Ttl(_)))
}

fn is_preview_action(r: &Routed) -> bool {
    matches!(
        r.kind.callback(),
        Some(
            Callback::SendDraft(_)
                | Callback::CancelDraft(_)
                | Callback::DelayDraft(_)
                | Callback::CancelDelayed(_)
        )
    )
}

fn is_end(r: &Routed) -> bool {
    r.kind.command() == Some(&Command::End)
}

fn is_relay_text(r: &Routed) -> bool {
    r.in_relay && r.kind.is_text()
}

fn is_channel_callback(r: &Routed) -> bool {
    matches!(
        r.kind.callback(),
        Some(
            Callback::SelectMailbox(_) | Callback::ContactAuthor(_) | Callback::ExtendPost { .. }
        )
    )
}

fn is_admin_forward(r: &Routed) -> bool {
    r.is_admin && matches!(r.kind, EventKind::Forwarded(_))
}

fn is_debug(r: &Routed) -> bool {
    r.kind.command() == Some(&Command::Debug)
}

fn is_free_text(r: &Routed) -> bool {
    !r.is_admin && r.state.kind() == PhaseKind::Idle && r.kind.is_text()
}
