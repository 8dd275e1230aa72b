//! Buttons under channel posts and the mailbox list.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    audit::AuditEvent,
    callbacks::Callback,
    dispatch::{Handler, Routed},
    domain::DraftId,
    formatting::{escape_html, format_expiry, truncate_text},
    pseudonym::pseudonym_or_placeholder,
    publish::{ExtendError, ExtendOutcome},
    relay::RelayRejection,
    services::Core,
    Result,
};

use super::{answer, bind, chat_of, reply, TRY_LATER};

pub struct ChannelCallback;

#[async_trait]
impl Handler for ChannelCallback {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        match routed.kind.callback() {
            Some(Callback::SelectMailbox(id)) => bind::select(&core, &routed, *id).await,
            Some(Callback::ContactAuthor(draft_id)) => contact_author(&core, &routed, draft_id).await,
            Some(Callback::ExtendPost { draft_id, label }) => {
                extend_post(&core, &routed, draft_id, label).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Reader pressed «⏳ +label» under a post. Pressing it again takes the
/// extension back.
async fn extend_post(core: &Core, routed: &Routed, draft_id: &DraftId, label: &str) {
    let Some(option) = core.cfg.extend_by_label(label) else {
        answer(core, routed, Some("This option is no longer offered.")).await;
        return;
    };
    let reader = routed.event.user_id;
    let toast = match core.publisher.toggle_extension(draft_id, reader, option).await {
        Ok(ExtendOutcome::Added { delete_at }) => format!(
            "⏳ +{}: {}",
            option.label,
            format_expiry(delete_at, core.cfg.timezone_offset_minutes)
        ),
        Ok(ExtendOutcome::Removed { delete_at }) => format!(
            "↩️ Extension withdrawn: {}",
            format_expiry(delete_at, core.cfg.timezone_offset_minutes)
        ),
        Err(ExtendError::Gone) => "This letter has already burned.".to_string(),
        Err(ExtendError::TooLate) => {
            "Too little time is left to withdraw this extension.".to_string()
        }
        Err(e @ (ExtendError::Busy | ExtendError::Unavailable(_) | ExtendError::Storage(_))) => {
            tracing::warn!(user_id = reader.0, draft_id = %draft_id, error = %e, "extension failed");
            TRY_LATER.to_string()
        }
    };
    answer(core, routed, Some(toast.as_str())).await;
}

async fn contact_author(core: &Core, routed: &Routed, draft_id: &DraftId) -> Result<()> {
    let reader = routed.event.user_id;
    let Some(post) = core.storage.post(draft_id).await? else {
        answer(core, routed, Some("This letter is no longer available.")).await;
        return Ok(());
    };

    let reader_alias = pseudonym_or_placeholder(core.pseudonyms.as_ref(), reader, post.mailbox_id).await;
    let opened = core
        .relays
        .open(
            reader,
            post.author_id,
            draft_id.clone(),
            post.mailbox_id,
            reader_alias.clone(),
            post.pseudonym.clone(),
        )
        .await;
    let (relay, replaced) = match opened {
        Ok(v) => v,
        Err(RelayRejection::SelfContact) => {
            answer(core, routed, Some("This is your own letter.")).await;
            return Ok(());
        }
        Err(RelayRejection::PeerBusy) => {
            answer(
                core,
                routed,
                Some("The author is in another dialogue right now. Try again later."),
            )
            .await;
            return Ok(());
        }
    };

    let old_peer = replaced
        .as_ref()
        .and_then(|old| old.route_from(reader))
        .map(|(peer, _)| peer)
        .filter(|peer| *peer != relay.author);
    if let Some(peer) = old_peer {
        core.audit
            .record(AuditEvent::relay_closed(reader, peer, "replaced"));
        reply(core, peer, "🔚 The other side has closed the dialogue.").await;
    }

    // The reader may never have started the bot.
    let intro = format!(
        "💬 You are now talking to <b>{}</b> as <b>{}</b>.\n\nEverything you send here is forwarded anonymously. /end to finish.",
        escape_html(&relay.author_alias),
        escape_html(&relay.initiator_alias)
    );
    if let Err(e) = core.messenger.send_html(chat_of(reader), &intro).await {
        tracing::info!(user_id = reader.0, error = %e, "reader unreachable, relay dropped");
        core.relays.close(reader).await;
        answer(core, routed, Some("Open the bot first, then press the button again.")).await;
        return Ok(());
    }

    let notice = format!(
        "💬 <b>{}</b> wants to talk about your letter:\n<i>{}</i>\n\nReply here to answer. /end to finish.",
        escape_html(&relay.initiator_alias),
        escape_html(&truncate_text(&post.text, 80))
    );
    if let Err(e) = core.messenger.send_html(chat_of(relay.author), &notice).await {
        tracing::warn!(user_id = relay.author.0, error = %e, "author notice failed");
    }

    core.audit
        .record(AuditEvent::relay_opened(reader, relay.author, draft_id));
    tracing::info!(
        user_id = reader.0,
        peer_id = relay.author.0,
        mailbox_id = relay.mailbox_id.0,
        "relay opened"
    );
    answer(core, routed, None).await;
    Ok(())
}
