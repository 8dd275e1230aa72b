use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    dispatch::{
        event::{Command, EventKind},
        Handler, Routed,
    },
    resilience::BreakerSnapshot,
    services::Core,
    Result,
};

use super::reply;

/// `/status` and `/reset_breakers`, admins only.
pub struct Admin;

#[async_trait]
impl Handler for Admin {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let user = routed.event.user_id;
        match &routed.kind {
            EventKind::Command(Command::Status) => {
                let html = status(&core).await?;
                reply(&core, user, &html).await;
            }
            EventKind::Command(Command::ResetBreakers) => {
                core.breakers.reset_all();
                tracing::info!(user_id = user.0, "breakers reset by admin");
                reply(&core, user, "✅ Breakers reset.").await;
            }
            _ => {}
        }
        Ok(())
    }
}

async fn status(core: &Core) -> Result<String> {
    let mut lines = vec!["📊 <b>Status</b>".to_string(), String::new()];
    for (capability, snap) in core.breakers.snapshots() {
        lines.push(format!("{capability}: {}", breaker_line(&snap)));
    }
    lines.push(String::new());
    lines.push(format!(
        "drafts in progress: {}",
        core.conversations.active_count().await
    ));
    lines.push(format!("open dialogues: {}", core.relays.active_count().await));
    lines.push(format!("pending rollbacks: {}", core.rollback.pending()));
    lines.push(format!("delayed letters: {}", core.delayed.len().await));
    lines.push(format!("unmarked posts: {}", core.publisher.unmarked()));
    lines.push(format!("mailboxes: {}", core.storage.mailboxes().await?.len()));
    Ok(lines.join("\n"))
}

fn breaker_line(snap: &BreakerSnapshot) -> String {
    let mut out = format!(
        "<b>{}</b> (failures {}, opened {}x)",
        snap.state, snap.failure_count, snap.times_opened
    );
    if let Some(wait) = snap.retry_in {
        out.push_str(&format!(", retry in {}s", wait.as_secs()));
    }
    out
}
