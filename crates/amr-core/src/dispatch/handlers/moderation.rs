//! `/block`, `/unblock`, `/blocks`, `/cooldown`, `/uncooldown`. Admins only,
//! scoped to the admin's current mailbox.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    audit::AuditEvent,
    config::TtlChoice,
    dispatch::{
        event::{Command, EventKind},
        Handler, Routed,
    },
    domain::{MailboxId, UserId},
    formatting::escape_html,
    moderation::{format_remaining, normalize_word},
    ports::{Cooldown, WordBlock},
    services::Core,
    Result,
};

use super::reply;

const BLOCK_USAGE: &str = "Usage: <code>/block word [duration] [reason]</code>\nExample: <code>/block casino 24h ads</code>";
const COOLDOWN_USAGE: &str = "Usage: <code>/cooldown duration pseudonym</code>\nExample: <code>/cooldown 6h Quiet Otter</code>";
const NO_SCOPE: &str = "Pick a mailbox under «📬 Mailboxes» first.";

pub struct Moderation;

#[async_trait]
impl Handler for Moderation {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()> {
        let admin = routed.event.user_id;
        let EventKind::Command(cmd) = &routed.kind else {
            return Ok(());
        };
        let Some(mailbox_id) = core.session.active_mailbox(admin, routed.event.chat_id).await? else {
            reply(&core, admin, NO_SCOPE).await;
            return Ok(());
        };
        let html = match cmd {
            Command::Block(args) => block(&core, admin, mailbox_id, args.as_deref()).await?,
            Command::Unblock(args) => unblock(&core, admin, mailbox_id, args.as_deref()).await?,
            Command::Blocks => list_blocks(&core, mailbox_id).await?,
            Command::Cooldown(args) => cooldown(&core, admin, mailbox_id, args.as_deref()).await?,
            Command::Uncooldown(args) => uncooldown(&core, admin, mailbox_id, args.as_deref()).await?,
            _ => return Ok(()),
        };
        reply(&core, admin, &html).await;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BlockArgs {
    pub word: String,
    pub duration: Option<TtlChoice>,
    pub reason: Option<String>,
}

/// `word [duration] [reason...]`. The second token counts as a duration only
/// if it parses as one.
pub(crate) fn parse_block_args(raw: &str) -> Option<BlockArgs> {
    let mut parts = raw.split_whitespace();
    let word = normalize_word(parts.next()?)?;
    let rest: Vec<&str> = parts.collect();
    let (duration, reason) = match rest.split_first() {
        Some((first, tail)) => match TtlChoice::parse(first) {
            Some(d) => (Some(d), tail.join(" ")),
            None => (None, rest.join(" ")),
        },
        None => (None, String::new()),
    };
    Some(BlockArgs {
        word,
        duration,
        reason: (!reason.is_empty()).then_some(reason),
    })
}

/// `duration pseudonym...`
pub(crate) fn parse_cooldown_args(raw: &str) -> Option<(TtlChoice, String)> {
    let (dur, alias) = raw.trim().split_once(char::is_whitespace)?;
    let alias = alias.trim();
    if alias.is_empty() {
        return None;
    }
    Some((TtlChoice::parse(dur)?, alias.to_string()))
}

async fn block(core: &Core, admin: UserId, mailbox_id: MailboxId, args: Option<&str>) -> Result<String> {
    let Some(args) = args.and_then(parse_block_args) else {
        return Ok(BLOCK_USAGE.to_string());
    };
    let expires_at = args
        .duration
        .as_ref()
        .map(|d| Utc::now().timestamp() + i64::try_from(d.duration.as_secs()).unwrap_or(i64::MAX / 2));
    core.storage
        .add_word_block(WordBlock {
            word: args.word.clone(),
            mailbox_id: Some(mailbox_id),
            reason: args.reason.clone(),
            created_by: admin,
            expires_at,
        })
        .await?;
    core.audit
        .record(AuditEvent::moderation(admin, mailbox_id, "block", &args.word));
    tracing::info!(user_id = admin.0, mailbox_id = mailbox_id.0, word = %args.word, "word blocked");

    let mut html = format!("🚫 Blocked <code>{}</code>", escape_html(&args.word));
    match &args.duration {
        Some(d) => html.push_str(&format!(" for {}.", escape_html(&d.label))),
        None => html.push_str(" until lifted."),
    }
    if let Some(reason) = &args.reason {
        html.push_str(&format!("\nReason: {}", escape_html(reason)));
    }
    Ok(html)
}

async fn unblock(core: &Core, admin: UserId, mailbox_id: MailboxId, args: Option<&str>) -> Result<String> {
    let Some(word) = args.and_then(normalize_word) else {
        return Ok("Usage: <code>/unblock word</code>".to_string());
    };
    if !core.storage.remove_word_block(&word, Some(mailbox_id)).await? {
        return Ok(format!("<code>{}</code> is not blocked here.", escape_html(&word)));
    }
    core.audit
        .record(AuditEvent::moderation(admin, mailbox_id, "unblock", &word));
    Ok(format!("✅ <code>{}</code> is allowed again.", escape_html(&word)))
}

async fn list_blocks(core: &Core, mailbox_id: MailboxId) -> Result<String> {
    let now = Utc::now().timestamp();
    let blocks = core.storage.word_blocks(mailbox_id, now).await?;
    if blocks.is_empty() {
        return Ok("✅ No blocked words.".to_string());
    }
    let mut lines = vec![format!("🚫 <b>Blocked words ({})</b>", blocks.len())];
    for b in &blocks {
        let mut line = format!("• <code>{}</code>", escape_html(&b.word));
        if b.mailbox_id.is_none() {
            line.push_str(" (all mailboxes)");
        }
        if let Some(at) = b.expires_at {
            let left = std::time::Duration::from_secs(u64::try_from(at - now).unwrap_or(0));
            line.push_str(&format!(", {} left", format_remaining(left)));
        }
        if let Some(reason) = &b.reason {
            line.push_str(&format!(": <i>{}</i>", escape_html(reason)));
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// Authors who published in `mailbox_id` under `alias`. Only posts still on
/// record are searched.
async fn authors_of(core: &Core, mailbox_id: MailboxId, alias: &str) -> Result<BTreeSet<UserId>> {
    let alias = alias.to_lowercase();
    Ok(core
        .storage
        .posts_in_mailbox(mailbox_id)
        .await?
        .into_iter()
        .filter(|p| p.pseudonym.to_lowercase() == alias)
        .map(|p| p.author_id)
        .collect())
}

async fn cooldown(core: &Core, admin: UserId, mailbox_id: MailboxId, args: Option<&str>) -> Result<String> {
    let Some((duration, alias)) = args.and_then(parse_cooldown_args) else {
        return Ok(COOLDOWN_USAGE.to_string());
    };
    let authors = authors_of(core, mailbox_id, &alias).await?;
    if authors.is_empty() {
        return Ok(format!(
            "No letters by <b>{}</b> in this mailbox.",
            escape_html(&alias)
        ));
    }
    let until = Utc::now().timestamp() + i64::try_from(duration.duration.as_secs()).unwrap_or(i64::MAX / 2);
    for author in &authors {
        core.storage
            .set_cooldown(Cooldown {
                user_id: *author,
                mailbox_id: Some(mailbox_id),
                until,
            })
            .await?;
    }
    core.audit
        .record(AuditEvent::moderation(admin, mailbox_id, "cooldown", &alias));
    tracing::info!(
        user_id = admin.0,
        mailbox_id = mailbox_id.0,
        authors = authors.len(),
        "cooldown set"
    );
    Ok(format!(
        "⏳ <b>{}</b> cannot write here for {}.",
        escape_html(&alias),
        format_remaining(duration.duration)
    ))
}

async fn uncooldown(core: &Core, admin: UserId, mailbox_id: MailboxId, args: Option<&str>) -> Result<String> {
    let Some(alias) = args.map(str::trim).filter(|a| !a.is_empty()) else {
        return Ok("Usage: <code>/uncooldown pseudonym</code>".to_string());
    };
    let mut lifted = 0;
    for author in authors_of(core, mailbox_id, alias).await? {
        lifted += core.storage.clear_cooldowns(author, Some(mailbox_id)).await?;
    }
    if lifted == 0 {
        return Ok(format!("<b>{}</b> has no cooldown here.", escape_html(alias)));
    }
    core.audit
        .record(AuditEvent::moderation(admin, mailbox_id, "uncooldown", alias));
    Ok(format!("✅ <b>{}</b> can write again.", escape_html(alias)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_args_take_an_optional_duration_then_reason() {
        let a = parse_block_args("Casino 24h paid ads").unwrap();
        assert_eq!(a.word, "casino");
        assert_eq!(a.duration.unwrap().label, "24h");
        assert_eq!(a.reason.as_deref(), Some("paid ads"));

        let a = parse_block_args("casino paid ads").unwrap();
        assert!(a.duration.is_none());
        assert_eq!(a.reason.as_deref(), Some("paid ads"));

        let a = parse_block_args("casino").unwrap();
        assert_eq!((a.duration, a.reason), (None, None));

        assert!(parse_block_args("ok").is_none());
        assert!(parse_block_args("").is_none());
    }

    #[test]
    fn cooldown_args_keep_multiword_pseudonyms() {
        let (d, alias) = parse_cooldown_args("6h Quiet Otter").unwrap();
        assert_eq!(d.duration.as_secs(), 6 * 3600);
        assert_eq!(alias, "Quiet Otter");
        assert!(parse_cooldown_args("6h").is_none());
        assert!(parse_cooldown_args("soon Quiet Otter").is_none());
    }
}
