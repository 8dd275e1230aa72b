//! Inline-button payloads. Telegram caps `callback_data` at 64 bytes, which
//! every variant stays well under (draft ids are 32 hex chars).

use std::fmt;

use crate::domain::{DraftId, MailboxId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    /// TTL selection; carries the raw label, validated later against config.
    Ttl(String),
    SendDraft(DraftId),
    CancelDraft(DraftId),
    /// «Send later» on a preview.
    DelayDraft(DraftId),
    /// Withdraw a draft queued by «Send later».
    CancelDelayed(DraftId),
    SelectMailbox(MailboxId),
    ContactAuthor(DraftId),
    /// Reader toggles an extension of the post's lifetime.
    ExtendPost { draft_id: DraftId, label: String },
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        let (prefix, rest) = data.split_once(':')?;
        match prefix {
            "ttl" if !rest.is_empty() => Some(Self::Ttl(rest.to_string())),
            "draft" => {
                let (action, id) = rest.split_once(':')?;
                let id = draft_id(id)?;
                match action {
                    "send" => Some(Self::SendDraft(id)),
                    "cancel" => Some(Self::CancelDraft(id)),
                    "delay" => Some(Self::DelayDraft(id)),
                    _ => None,
                }
            }
            "delay" => draft_id(rest.strip_prefix("cancel:")?).map(Self::CancelDelayed),
            "mbox" => rest.parse::<i64>().ok().map(|n| Self::SelectMailbox(MailboxId(n))),
            "post" => match rest.split_once(':')? {
                ("contact", id) => draft_id(id).map(Self::ContactAuthor),
                ("ext", tail) => {
                    let (label, id) = tail.split_once(':')?;
                    let label_ok = !label.is_empty()
                        && label.len() <= 8
                        && label.chars().all(|c| c.is_ascii_alphanumeric());
                    label_ok.then_some(())?;
                    Some(Self::ExtendPost {
                        draft_id: draft_id(id)?,
                        label: label.to_string(),
                    })
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn draft_id(raw: &str) -> Option<DraftId> {
    let ok = !raw.is_empty() && raw.len() <= 40 && raw.chars().all(|c| c.is_ascii_alphanumeric());
    ok.then(|| DraftId(raw.to_string()))
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ttl(label) => write!(f, "ttl:{label}"),
            Self::SendDraft(id) => write!(f, "draft:send:{id}"),
            Self::CancelDraft(id) => write!(f, "draft:cancel:{id}"),
            Self::DelayDraft(id) => write!(f, "draft:delay:{id}"),
            Self::CancelDelayed(id) => write!(f, "delay:cancel:{id}"),
            Self::SelectMailbox(id) => write!(f, "mbox:{id}"),
            Self::ContactAuthor(id) => write!(f, "post:contact:{id}"),
            Self::ExtendPost { draft_id, label } => write!(f, "post:ext:{label}:{draft_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_payloads() {
        let id = DraftId::generate();
        assert_eq!(Callback::parse("ttl:1h"), Some(Callback::Ttl("1h".to_string())));
        assert_eq!(
            Callback::parse(&format!("draft:send:{id}")),
            Some(Callback::SendDraft(id.clone()))
        );
        assert_eq!(
            Callback::parse(&format!("post:contact:{id}")),
            Some(Callback::ContactAuthor(id))
        );
        assert_eq!(
            Callback::parse("mbox:12"),
            Some(Callback::SelectMailbox(MailboxId(12)))
        );
        assert_eq!(
            Callback::parse("post:ext:6h:abc123"),
            Some(Callback::ExtendPost {
                draft_id: DraftId("abc123".to_string()),
                label: "6h".to_string(),
            })
        );
        assert_eq!(
            Callback::parse("delay:cancel:abc123"),
            Some(Callback::CancelDelayed(DraftId("abc123".to_string())))
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        for bad in [
            "",
            "ttl:",
            "draft:send:",
            "draft:burn:abc",
            "mbox:x",
            "post:like:abc",
            "post:ext:abc",
            "post:ext::abc",
            "post:ext:1h:",
            "delay:keep:abc",
            "x:y",
        ] {
            assert_eq!(Callback::parse(bad), None, "{bad}");
        }
        assert_eq!(Callback::parse("draft:send:../../etc"), None);
    }

    #[test]
    fn encoded_payloads_fit_telegram_limit() {
        let id = DraftId::generate();
        for cb in [
            Callback::SendDraft(id.clone()),
            Callback::CancelDraft(id.clone()),
            Callback::DelayDraft(id.clone()),
            Callback::CancelDelayed(id.clone()),
            Callback::ContactAuthor(id.clone()),
            Callback::ExtendPost {
                draft_id: id,
                label: "24h".to_string(),
            },
            Callback::SelectMailbox(MailboxId(i64::MAX)),
        ] {
            let encoded = cb.to_string();
            assert!(encoded.len() <= 64);
            assert_eq!(Callback::parse(&encoded), Some(cb));
        }
    }
}
