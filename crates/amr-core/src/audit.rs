use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{DraftId, MailboxId, UserId},
    errors::Error,
    formatting::truncate_text,
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailbox_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pseudonym: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, user_id: UserId) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user_id: Some(user_id.0),
            mailbox_id: None,
            draft_id: None,
            pseudonym: None,
            content: None,
            peer_id: None,
            error: None,
            context: None,
        }
    }

    pub fn published(
        user_id: UserId,
        mailbox_id: MailboxId,
        draft_id: &DraftId,
        pseudonym: &str,
        text: &str,
    ) -> Self {
        Self {
            mailbox_id: Some(mailbox_id.0),
            draft_id: Some(draft_id.0.clone()),
            pseudonym: Some(pseudonym.to_string()),
            content: Some(text.to_string()),
            ..Self::base("published", user_id)
        }
    }

    pub fn cancelled(user_id: UserId, phase: &str) -> Self {
        Self {
            context: Some(phase.to_string()),
            ..Self::base("cancelled", user_id)
        }
    }

    pub fn relay_opened(user_id: UserId, peer: UserId, draft_id: &DraftId) -> Self {
        Self {
            peer_id: Some(peer.0),
            draft_id: Some(draft_id.0.clone()),
            ..Self::base("relay_opened", user_id)
        }
    }

    pub fn relay_closed(user_id: UserId, peer: UserId, reason: &str) -> Self {
        Self {
            peer_id: Some(peer.0),
            context: Some(reason.to_string()),
            ..Self::base("relay_closed", user_id)
        }
    }

    /// Admin moderation action: `action` is the command, `context` its target.
    pub fn moderation(admin: UserId, mailbox_id: MailboxId, action: &str, context: &str) -> Self {
        Self {
            mailbox_id: Some(mailbox_id.0),
            context: Some(format!("{action} {context}")),
            ..Self::base("moderation", admin)
        }
    }

    pub fn fatal(user_id: UserId, rule: &str, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            context: Some(rule.to_string()),
            ..Self::base("fatal", user_id)
        }
    }
}

/// Append-only audit trail, one JSON line per event (or a readable block when
/// JSON is disabled).
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::Invariant(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write and log failures; auditing never interrupts a user flow.
    pub fn record(&self, event: AuditEvent) {
        let kind = event.event.clone();
        if let Err(e) = self.write(event) {
            tracing::warn!(event = %kind, error = %e, "audit write failed");
        }
    }
}
