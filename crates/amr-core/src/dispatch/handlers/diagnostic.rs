use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    dispatch::{Handler, Routed},
    formatting::escape_html,
    services::Core,
    Result,
};

use super::reply;

/// `/debug`: what the router saw for this user.
pub struct Diagnostic;

#[async_trait]
impl Handler for Diagnostic {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let state = &routed.state;
        let mailbox = state
            .mailbox_id
            .map(|m| m.to_string())
            .unwrap_or_else(|| "none".to_string());
        let html = format!(
            "🔧 <b>Debug</b>\n\n\
             user: <code>{}</code>\n\
             chat: <code>{}</code>\n\
             phase: <code>{}</code>\n\
             mailbox: <code>{}</code>\n\
             draft: <code>{}</code>\n\
             relay: <code>{}</code>\n\
             admin: <code>{}</code>",
            routed.event.user_id,
            routed.event.chat_id.0,
            state.kind(),
            escape_html(&mailbox),
            state.draft_id().map(|d| d.to_string()).unwrap_or_default(),
            routed.in_relay,
            routed.is_admin,
        );
        reply(&core, routed.event.user_id, &html).await;
        Ok(())
    }
}
