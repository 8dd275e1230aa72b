use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};

use crate::{
    domain::{MailboxId, UserId},
    ports::PseudonymGenerator,
    Result,
};

const ADJECTIVES: &[&str] = &[
    "Quiet", "Amber", "Restless", "Gentle", "Silver", "Hidden", "Brave", "Sleepy", "Wandering",
    "Crimson", "Patient", "Curious", "Distant", "Honest", "Midnight", "Stormy",
];

const NOUNS: &[&str] = &[
    "Otter", "Heron", "Lantern", "Fox", "Willow", "Comet", "Badger", "Harbor", "Sparrow", "Maple",
    "Raven", "Pebble", "Lynx", "Meadow", "Owl", "Ember",
];

/// Default generator: a stable "Adjective Noun" per (user, mailbox, day), so a
/// writer keeps one identity for a day and gets a fresh one the next.
#[derive(Clone, Debug, Default)]
pub struct WordlistPseudonyms;

impl WordlistPseudonyms {
    pub fn pick(user_id: UserId, mailbox_id: MailboxId, day: NaiveDate) -> String {
        let mut h = Sha256::new();
        h.update(user_id.0.to_be_bytes());
        h.update(mailbox_id.0.to_be_bytes());
        h.update(day.to_string().as_bytes());
        let digest = h.finalize();
        let adj = ADJECTIVES[usize::from(digest[0]) % ADJECTIVES.len()];
        let noun = NOUNS[usize::from(digest[1]) % NOUNS.len()];
        format!("{adj} {noun}")
    }
}

#[async_trait]
impl PseudonymGenerator for WordlistPseudonyms {
    async fn generate(&self, user_id: UserId, mailbox_id: MailboxId) -> Result<String> {
        Ok(Self::pick(user_id, mailbox_id, Utc::now().date_naive()))
    }
}

/// Degraded-but-valid identity used when the generator fails.
pub fn placeholder(user_id: UserId) -> String {
    let digest = Sha256::digest(user_id.0.to_be_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]) % 10_000;
    format!("Anonymous #{n:04}")
}

/// Generate a pseudonym, never failing composition over it.
pub async fn pseudonym_or_placeholder(
    generator: &dyn PseudonymGenerator,
    user_id: UserId,
    mailbox_id: MailboxId,
) -> String {
    match generator.generate(user_id, mailbox_id).await {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        Ok(_) => {
            tracing::warn!(user_id = user_id.0, mailbox_id = mailbox_id.0, "empty pseudonym");
            placeholder(user_id)
        }
        Err(e) => {
            tracing::warn!(
                user_id = user_id.0,
                mailbox_id = mailbox_id.0,
                error = %e,
                "pseudonym generation failed, using placeholder"
            );
            placeholder(user_id)
        }
    }
}
