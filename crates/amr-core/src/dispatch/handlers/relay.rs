use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    audit::AuditEvent,
    dispatch::{event::EventKind, Handler, Routed},
    errors::with_timeout,
    formatting::render_relay_message,
    resilience::{guarded, Capability, Guarded},
    services::Core,
    Result,
};

use super::{chat_of, reply, TRY_LATER};

const CLOSED: &str = "🔚 The dialogue is closed.";

const UNREACHABLE: &str = "🔚 The other side can no longer be reached. The dialogue is closed.";

/// `/end`: close the dialogue for both sides.
pub struct EndRelay;

/// Forward plain text to the other participant.
pub struct Passthrough;

#[async_trait]
impl Handler for EndRelay {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let user = routed.event.user_id;
        let Some(relay) = core.relays.close(user).await else {
            reply(&core, user, "You have no open dialogue.").await;
            return Ok(());
        };
        if let Some((peer, _)) = relay.route_from(user) {
            core.audit
                .record(AuditEvent::relay_closed(user, peer, "ended"));
            reply(&core, peer, "🔚 The other side has closed the dialogue.").await;
        }
        reply(&core, user, CLOSED).await;
        Ok(())
    }
}

#[async_trait]
impl Handler for Passthrough {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let EventKind::Text(text) = &routed.kind else {
            return Ok(());
        };
        let user = routed.event.user_id;
        let Some(relay) = core.relays.touch(user).await else {
            reply(&core, user, "⌛ The dialogue has already ended.").await;
            return Ok(());
        };
        let Some((peer, alias)) = relay.route_from(user) else {
            return Ok(());
        };

        let html = render_relay_message(alias, text);
        let sent = guarded(
            core.breakers.get(Capability::Transport),
            with_timeout(
                core.cfg.transport_timeout,
                "relay message",
                core.messenger.send_html(chat_of(peer), &html),
            ),
        )
        .await;
        match sent {
            Ok(_) => {
                tracing::debug!(user_id = user.0, peer_id = peer.0, "relay message delivered");
            }
            Err(Guarded::Unavailable) => reply(&core, user, TRY_LATER).await,
            Err(Guarded::Inner(e)) if e.is_rejected() => {
                // The peer blocked the bot or left; nothing will ever get through.
                tracing::info!(user_id = user.0, peer_id = peer.0, error = %e, "relay peer unreachable");
                core.relays.close(user).await;
                core.audit
                    .record(AuditEvent::relay_closed(user, peer, "unreachable"));
                reply(&core, user, UNREACHABLE).await;
            }
            Err(Guarded::Inner(e)) => {
                tracing::warn!(user_id = user.0, peer_id = peer.0, error = %e, "relay delivery failed");
                reply(&core, user, "❌ The message could not be delivered.").await;
            }
        }
        Ok(())
    }
}
