//! Channel auto-discovery: an admin forwards any post from a channel where the
//! bot is an administrator, and the channel becomes a mailbox.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    dispatch::{event::EventKind, Handler, Routed},
    domain::{ChannelRef, UserId},
    formatting::{deep_link, escape_html},
    messaging::types::ChatInfo,
    ports::NewMailbox,
    services::Core,
    Result,
};

use super::reply;

pub struct ChannelDiscovery;

#[async_trait]
impl Handler for ChannelDiscovery {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let EventKind::Forwarded(origin) = &routed.kind else {
            return Ok(());
        };
        let admin = routed.event.user_id;

        // Forward headers may omit the title; the platform has the current one.
        let info = match core.messenger.get_chat_info(origin.id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    user_id = admin.0,
                    channel_id = origin.id.0,
                    error = %e,
                    "channel lookup failed"
                );
                reply(
                    &core,
                    admin,
                    "❌ Could not read this channel. Make sure the bot is an administrator there.",
                )
                .await;
                return Ok(());
            }
        };

        let mailbox = core.storage.create_mailbox(new_mailbox(&info, admin)).await?;
        tracing::info!(
            user_id = admin.0,
            mailbox_id = mailbox.id.0,
            channel_id = mailbox.channel_id.0,
            "mailbox registered"
        );
        let link = deep_link(core.cfg.bot_username.as_deref(), mailbox.id);
        reply(
            &core,
            admin,
            &format!(
                "📬 Mailbox <b>{}</b> is ready.\n\nShare this link with writers:\n{}",
                escape_html(&mailbox.title),
                escape_html(&link)
            ),
        )
        .await;
        Ok(())
    }
}

fn new_mailbox(info: &ChatInfo, creator: UserId) -> NewMailbox {
    let channel = info
        .username
        .as_deref()
        .and_then(ChannelRef::parse)
        .unwrap_or(ChannelRef::Id(info.id));
    let title = info
        .title
        .clone()
        .or_else(|| info.username.as_ref().map(|u| format!("@{u}")))
        .unwrap_or_else(|| info.id.0.to_string());
    NewMailbox {
        title,
        channel_id: info.id,
        channel,
        creator_id: Some(creator),
    }
}
