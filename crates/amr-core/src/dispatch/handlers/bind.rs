//! Deep-link binding (`/start <mailbox_id>`) and mailbox selection buttons.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    dispatch::{
        event::{Command, EventKind},
        Handler, Routed,
    },
    domain::{MailboxId, UserId},
    formatting::escape_html,
    services::Core,
    Result,
};

use super::{answer, reply, reply_menu};

pub struct DeepLink;

#[async_trait]
impl Handler for DeepLink {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let EventKind::Command(Command::Start(Some(payload))) = &routed.kind else {
            return Ok(());
        };
        let user = routed.event.user_id;
        let Some(id) = parse_payload(payload) else {
            tracing::debug!(user_id = user.0, payload, "invalid deep-link payload");
            reply(&core, user, "This link is not valid.").await;
            return Ok(());
        };
        if !bind(&core, user, id).await? {
            reply(&core, user, "This mailbox does not exist anymore.").await;
        }
        Ok(())
    }
}

/// `mbox:<id>` button from the mailbox list.
pub(crate) async fn select(core: &Core, routed: &Routed, id: MailboxId) -> Result<()> {
    let user = routed.event.user_id;
    if bind(core, user, id).await? {
        answer(core, routed, None).await;
    } else {
        answer(core, routed, Some("This mailbox does not exist anymore.")).await;
    }
    Ok(())
}

/// Make `id` the user's active mailbox. False if it does not exist.
async fn bind(core: &Core, user: UserId, id: MailboxId) -> Result<bool> {
    let Some(mailbox) = core.storage.mailbox(id).await? else {
        return Ok(false);
    };
    core.storage.set_active_mailbox(user, id).await?;
    tracing::info!(user_id = user.0, mailbox_id = id.0, "mailbox bound");
    reply_menu(
        core,
        user,
        &format!(
            "📬 You are now writing to <b>{}</b>.\n\nSend your letter as a message or press «✍️ Write a letter».",
            escape_html(&mailbox.title)
        ),
    )
    .await;
    Ok(true)
}

fn parse_payload(payload: &str) -> Option<MailboxId> {
    payload
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .map(MailboxId)
}
