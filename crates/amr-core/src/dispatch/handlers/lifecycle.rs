use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    dispatch::{
        event::{Command, EventKind},
        Handler, Routed,
    },
    formatting::{escape_html, mailbox_keyboard, MenuButton},
    services::Core,
    Result,
};

use super::{chat_of, compose::render, reply, reply_keyboard, reply_menu, ONBOARDING};

pub struct Lifecycle;

const HELP: &str = "✉️ <b>Anonymous letters</b>\n\n\
Write a letter and it is published in the mailbox channel under a pseudonym. \
It is deleted automatically after the time you choose.\n\n\
• «✍️ Write a letter» or just send text to start\n\
• /cancel discards the current draft\n\
• «💬 Contact author» under a letter opens an anonymous dialogue; /end closes it";

#[async_trait]
impl Handler for Lifecycle {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let user = routed.event.user_id;
        match &routed.kind {
            EventKind::Command(Command::Start(None)) => {
                let mailbox = core.session.active_mailbox(user, chat_of(user)).await?;
                let html = match mailbox {
                    Some(_) => format!("👋 Welcome!\n\n{HELP}"),
                    None => format!("👋 Welcome!\n\n{ONBOARDING}"),
                };
                reply_menu(&core, user, &html).await;
            }
            EventKind::Command(Command::Help) | EventKind::MenuButton(MenuButton::Help) => {
                reply_menu(&core, user, HELP).await;
            }
            EventKind::Command(Command::Cancel) => {
                let out = core.composer.cancel(user).await;
                render(&core, &routed, out).await;
            }
            EventKind::MenuButton(MenuButton::Mailboxes) => {
                let mailboxes = core.storage.mailboxes().await?;
                if mailboxes.is_empty() {
                    reply(&core, user, "📭 There are no mailboxes yet.").await;
                    return Ok(());
                }
                let active = core.session.active_mailbox(user, chat_of(user)).await?;
                let current = active
                    .and_then(|id| mailboxes.iter().find(|m| m.id == id))
                    .map(|m| format!("\n\nCurrently writing to <b>{}</b>.", escape_html(&m.title)))
                    .unwrap_or_default();
                reply_keyboard(
                    &core,
                    user,
                    &format!("📬 Choose a mailbox:{current}"),
                    mailbox_keyboard(&mailboxes),
                )
                .await;
            }
            _ => {}
        }
        Ok(())
    }
}
