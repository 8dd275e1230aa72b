//! Composition handlers: explicit compose button, text entry, TTL and preview
//! buttons, and the free-text fallback.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    callbacks::Callback,
    compose::{Accepted, Invalid, Outcome, Rejection},
    conversation::PhaseKind,
    dispatch::{event::EventKind, Handler, Routed},
    formatting::{
        delayed_keyboard, escape_html, format_expiry, preview_keyboard, render_preview,
        render_ttl_prompt, ttl_keyboard,
    },
    moderation::format_remaining,
    publish::PublishError,
    services::Core,
    Result,
};

use super::{answer, reply, reply_keyboard, reply_menu, ONBOARDING, TRY_LATER};

const ALREADY_SENT: &str = "This letter has already gone out.";

pub struct ComposeButton;
pub struct DraftText;
pub struct TtlSelected;
pub struct PreviewAction;
pub struct AutoCompose;

#[async_trait]
impl Handler for ComposeButton {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let user = routed.event.user_id;
        let out = core.composer.begin(user, routed.event.chat_id).await?;
        render(&core, &routed, out).await;
        Ok(())
    }
}

#[async_trait]
impl Handler for DraftText {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let EventKind::Text(text) = &routed.kind else {
            return Ok(());
        };
        let out = core.composer.submit_text(routed.event.user_id, text).await?;
        render(&core, &routed, out).await;
        Ok(())
    }
}

#[async_trait]
impl Handler for AutoCompose {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let EventKind::Text(text) = &routed.kind else {
            return Ok(());
        };
        let out = core
            .composer
            .auto_compose(routed.event.user_id, routed.event.chat_id, text)
            .await?;
        render(&core, &routed, out).await;
        Ok(())
    }
}

#[async_trait]
impl Handler for TtlSelected {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let Some(Callback::Ttl(label)) = routed.kind.callback() else {
            return Ok(());
        };
        let user = routed.event.user_id;
        match core.composer.choose_ttl(user, label).await? {
            Outcome::Rejected(Rejection::Invalid(Invalid::UnknownTtl(_))) => {
                answer(&core, &routed, Some("Please pick one of the offered durations.")).await;
                // Re-prompt with the current draft.
                let state = core.composer.state(user).await;
                if let (Some(text), Some(pseudonym)) = (state.draft_text(), state.pseudonym()) {
                    reply_keyboard(
                        &core,
                        user,
                        &render_ttl_prompt(text, pseudonym),
                        ttl_keyboard(&core.cfg.allowed_ttls),
                    )
                    .await;
                }
            }
            out @ Outcome::Rejected(_) => {
                let text = toast(&out);
                answer(&core, &routed, text.as_deref()).await;
            }
            out => {
                answer(&core, &routed, None).await;
                render(&core, &routed, out).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for PreviewAction {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let user = routed.event.user_id;
        let out = match routed.kind.callback() {
            Some(Callback::SendDraft(id)) => core.composer.confirm(user, id).await?,
            Some(Callback::CancelDraft(id)) => core.composer.cancel_draft(user, id).await,
            Some(Callback::DelayDraft(id)) => core.composer.schedule(user, id).await?,
            Some(Callback::CancelDelayed(id)) => {
                let out = core.composer.cancel_scheduled(user, id).await;
                if !out.is_accepted() {
                    answer(&core, &routed, Some(ALREADY_SENT)).await;
                    return Ok(());
                }
                out
            }
            _ => return Ok(()),
        };
        match out {
            out @ Outcome::Rejected(Rejection::StaleDraft | Rejection::WrongPhase(_)) => {
                let text = toast(&out);
                answer(&core, &routed, text.as_deref()).await;
            }
            out => {
                answer(&core, &routed, None).await;
                render(&core, &routed, out).await;
            }
        }
        Ok(())
    }
}

fn toast(out: &Outcome) -> Option<String> {
    match out {
        Outcome::Rejected(r) => Some(rejection_text(r)),
        Outcome::Accepted(_) => None,
    }
}

/// Tell the user where their draft stands after a transition attempt.
pub(crate) async fn render(core: &Core, routed: &Routed, out: Outcome) {
    let user = routed.event.user_id;
    match out {
        Outcome::Accepted(Accepted::AwaitingText { .. }) => {
            let html = format!(
                "✍️ Write your letter, up to {} characters.\n\n/cancel to stop.",
                core.cfg.max_draft_len
            );
            reply(core, user, &html).await;
        }
        Outcome::Accepted(Accepted::AwaitingTtl {
            draft_text,
            pseudonym,
        }) => {
            reply_keyboard(
                core,
                user,
                &render_ttl_prompt(&draft_text, &pseudonym),
                ttl_keyboard(&core.cfg.allowed_ttls),
            )
            .await;
        }
        Outcome::Accepted(Accepted::Preview {
            draft_text,
            pseudonym,
            ttl,
            draft_id,
        }) => {
            reply_keyboard(
                core,
                user,
                &render_preview(&draft_text, &pseudonym, &ttl),
                preview_keyboard(&draft_id),
            )
            .await;
        }
        Outcome::Accepted(Accepted::Published(post)) => {
            let html = format!(
                "✅ Your letter is up: {}\n{}",
                escape_html(&post.link),
                format_expiry(post.delete_at, core.cfg.timezone_offset_minutes)
            );
            reply_menu(core, user, &html).await;
        }
        Outcome::Accepted(Accepted::Scheduled { draft_id, due_in }) => {
            let html = format!(
                "⏰ Your letter goes out in {}. Changed your mind? Press «↩️ Don't send».",
                format_remaining(due_in)
            );
            reply_keyboard(core, user, &html, delayed_keyboard(&draft_id)).await;
        }
        Outcome::Accepted(Accepted::Unscheduled) => {
            reply_menu(core, user, "↩️ The letter will not be sent.").await;
        }
        Outcome::Accepted(Accepted::Cancelled { previous }) => {
            let html = if previous == PhaseKind::Idle {
                "Nothing to cancel."
            } else {
                "🗑 Draft discarded."
            };
            reply_menu(core, user, html).await;
        }
        Outcome::Rejected(r) => {
            tracing::debug!(
                user_id = user.0,
                phase = %routed.state.kind(),
                rejection = ?r,
                "transition rejected"
            );
            reply(core, user, &rejection_text(&r)).await;
        }
    }
}

pub(crate) fn rejection_text(r: &Rejection) -> String {
    match r {
        Rejection::NoMailbox => ONBOARDING.to_string(),
        Rejection::WrongPhase(_) => {
            "This step is no longer active. Press «✍️ Write a letter» to start over.".to_string()
        }
        Rejection::Invalid(Invalid::Empty) => "The letter is empty. Send some text.".to_string(),
        Rejection::Invalid(Invalid::TooLong { len, max }) => format!(
            "The letter is too long ({len} characters, at most {max}). Please shorten it."
        ),
        Rejection::Invalid(Invalid::UnknownTtl(_)) => {
            "Please pick one of the offered durations.".to_string()
        }
        Rejection::StaleDraft => "This preview is outdated.".to_string(),
        Rejection::RateLimited => "⏳ You are writing too fast. Please wait a little.".to_string(),
        Rejection::Cooldown { remaining } => format!(
            "⏳ You cannot write to this mailbox for now. Try again in {}.",
            format_remaining(*remaining)
        ),
        Rejection::Blocked { word, reason } => {
            let mut text = format!(
                "🚫 The letter contains a blocked word: «{}». The draft was discarded.",
                escape_html(word)
            );
            if let Some(reason) = reason {
                text.push_str(&format!("\nReason: {}", escape_html(reason)));
            }
            text
        }
        Rejection::Publish(PublishError::Timeout | PublishError::Unavailable(_)) => {
            format!("{TRY_LATER}\nYour draft is kept; press «📨 Send» again.")
        }
        Rejection::Publish(PublishError::Storage(_) | PublishError::Transport { .. }) => {
            "❌ The letter could not be published. Your draft is kept; press «📨 Send» to retry."
                .to_string()
        }
    }
}
