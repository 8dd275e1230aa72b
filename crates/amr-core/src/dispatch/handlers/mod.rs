//! Rule handlers. Replies to the user are best-effort: a failed reply is
//! logged and never turns a handled event into a failure.

pub mod admin;
pub mod bind;
pub mod channel;
pub mod compose;
pub mod diagnostic;
pub mod discovery;
pub mod lifecycle;
pub mod moderation;
pub mod relay;

use crate::{
    domain::{ChatId, UserId},
    formatting::main_menu,
    messaging::types::InlineKeyboard,
    services::Core,
};

use super::Routed;

pub(crate) const ONBOARDING: &str = "📭 You are not attached to a mailbox yet.\n\nOpen a mailbox link you were given, or pick one under «📬 Mailboxes».";

pub(crate) const TRY_LATER: &str = "⏳ The service is busy right now. Please try again in a minute.";

/// Replies go to the user's private chat, even for buttons pressed under a
/// channel post.
pub(crate) fn chat_of(user_id: UserId) -> ChatId {
    user_id.into()
}

pub(crate) async fn reply(core: &Core, user_id: UserId, html: &str) {
    if let Err(e) = core.messenger.send_html(chat_of(user_id), html).await {
        tracing::warn!(user_id = user_id.0, error = %e, "reply failed");
    }
}

pub(crate) async fn reply_keyboard(core: &Core, user_id: UserId, html: &str, kb: InlineKeyboard) {
    if let Err(e) = core
        .messenger
        .send_inline_keyboard(chat_of(user_id), html, kb)
        .await
    {
        tracing::warn!(user_id = user_id.0, error = %e, "keyboard reply failed");
    }
}

pub(crate) async fn reply_menu(core: &Core, user_id: UserId, html: &str) {
    if let Err(e) = core
        .messenger
        .send_menu(chat_of(user_id), html, main_menu())
        .await
    {
        tracing::warn!(user_id = user_id.0, error = %e, "menu reply failed");
    }
}

/// Stop the button spinner, optionally with a toast.
pub(crate) async fn answer(core: &Core, routed: &Routed, text: Option<&str>) {
    let Some(id) = routed.event.callback_id.as_deref() else {
        return;
    };
    if let Err(e) = core.messenger.answer_callback_query(id, text).await {
        tracing::debug!(user_id = routed.event.user_id.0, error = %e, "callback answer failed");
    }
}
