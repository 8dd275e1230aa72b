//! Pseudonymous dialogues between a reader and a post author.

use std::{collections::HashMap, time::Duration};

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::{DraftId, MailboxId, UserId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relay {
    pub initiator: UserId,
    pub author: UserId,
    pub draft_id: DraftId,
    pub mailbox_id: MailboxId,
    pub initiator_alias: String,
    pub author_alias: String,
    pub expires_at: Instant,
}

impl Relay {
    /// The other participant and the alias `user` speaks under.
    pub fn route_from(&self, user: UserId) -> Option<(UserId, &str)> {
        if user == self.initiator {
            Some((self.author, &self.initiator_alias))
        } else if user == self.author {
            Some((self.initiator, &self.author_alias))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayRejection {
    #[error("cannot open a dialogue with yourself")]
    SelfContact,
    #[error("the author is already in a dialogue")]
    PeerBusy,
}

/// Active relays, indexed by both participants. A user is in at most one.
pub struct RelayRegistry {
    ttl: Duration,
    by_user: Mutex<HashMap<UserId, Relay>>,
}

impl RelayRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            by_user: Mutex::new(HashMap::new()),
        }
    }

    /// Open a relay. Any relay the initiator was already in is closed and
    /// returned alongside the new one.
    pub async fn open(
        &self,
        initiator: UserId,
        author: UserId,
        draft_id: DraftId,
        mailbox_id: MailboxId,
        initiator_alias: String,
        author_alias: String,
    ) -> Result<(Relay, Option<Relay>), RelayRejection> {
        if initiator == author {
            return Err(RelayRejection::SelfContact);
        }
        let now = Instant::now();
        let mut map = self.by_user.lock().await;
        if let Some(busy) = map.get(&author) {
            let same_pair = busy.route_from(initiator).is_some();
            if busy.expires_at > now && !same_pair {
                return Err(RelayRejection::PeerBusy);
            }
        }

        let replaced = detach(&mut map, initiator);
        detach(&mut map, author);

        let relay = Relay {
            initiator,
            author,
            draft_id,
            mailbox_id,
            initiator_alias,
            author_alias,
            expires_at: now + self.ttl,
        };
        map.insert(initiator, relay.clone());
        map.insert(author, relay.clone());
        Ok((relay, replaced))
    }

    /// The live relay `user` is in, extending it on activity.
    pub async fn touch(&self, user: UserId) -> Option<Relay> {
        let now = Instant::now();
        let mut map = self.by_user.lock().await;
        let relay = map.get(&user).filter(|r| r.expires_at > now)?.clone();
        let expires_at = now + self.ttl;
        for side in [relay.initiator, relay.author] {
            if let Some(r) = map.get_mut(&side) {
                r.expires_at = expires_at;
            }
        }
        Some(Relay { expires_at, ..relay })
    }

    pub async fn is_active(&self, user: UserId) -> bool {
        let now = Instant::now();
        self.by_user
            .lock()
            .await
            .get(&user)
            .is_some_and(|r| r.expires_at > now)
    }

    /// Close the relay `user` is in, for both sides.
    pub async fn close(&self, user: UserId) -> Option<Relay> {
        detach(&mut *self.by_user.lock().await, user)
    }

    pub async fn sweep_expired(&self) -> Vec<Relay> {
        let now = Instant::now();
        let mut map = self.by_user.lock().await;
        let mut expired: Vec<Relay> = Vec::new();
        map.retain(|user, relay| {
            if relay.expires_at > now {
                return true;
            }
            if *user == relay.initiator {
                expired.push(relay.clone());
            }
            false
        });
        expired
    }

    pub async fn active_count(&self) -> usize {
        self.by_user.lock().await.len() / 2
    }
}

fn detach(map: &mut HashMap<UserId, Relay>, user: UserId) -> Option<Relay> {
    let relay = map.remove(&user)?;
    if let Some((peer, _)) = relay.route_from(user) {
        map.remove(&peer);
    }
    Some(relay)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(reg: &RelayRegistry, a: i64, b: i64) -> Result<(Relay, Option<Relay>), RelayRejection> {
        reg.open(
            UserId(a),
            UserId(b),
            DraftId(format!("d{b}")),
            MailboxId(1),
            format!("reader{a}"),
            format!("author{b}"),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn routes_both_directions_under_aliases() {
        let reg = RelayRegistry::new(Duration::from_secs(60));
        open(&reg, 1, 2).await.unwrap();

        let relay = reg.touch(UserId(1)).await.unwrap();
        assert_eq!(relay.route_from(UserId(1)), Some((UserId(2), "reader1")));
        assert_eq!(relay.route_from(UserId(2)), Some((UserId(1), "author2")));
        assert_eq!(relay.route_from(UserId(3)), None);
        assert_eq!(reg.active_count().await, 1);
    }

    #[tokio::test]
    async fn rejects_self_contact_and_busy_author() {
        let reg = RelayRegistry::new(Duration::from_secs(60));
        assert_eq!(open(&reg, 1, 1).await.unwrap_err(), RelayRejection::SelfContact);
        open(&reg, 1, 2).await.unwrap();
        assert_eq!(open(&reg, 3, 2).await.unwrap_err(), RelayRejection::PeerBusy);
        // Re-contacting the same author just refreshes the pair.
        assert!(open(&reg, 1, 2).await.is_ok());
    }

    #[tokio::test]
    async fn opening_a_new_relay_closes_the_previous_one() {
        let reg = RelayRegistry::new(Duration::from_secs(60));
        open(&reg, 1, 2).await.unwrap();
        let (_, replaced) = open(&reg, 1, 3).await.unwrap();
        assert_eq!(replaced.unwrap().author, UserId(2));
        assert!(!reg.is_active(UserId(2)).await);
        assert!(reg.is_active(UserId(3)).await);
    }

    #[tokio::test]
    async fn close_ends_both_sides() {
        let reg = RelayRegistry::new(Duration::from_secs(60));
        open(&reg, 1, 2).await.unwrap();
        let closed = reg.close(UserId(2)).await.unwrap();
        assert_eq!(closed.initiator, UserId(1));
        assert!(!reg.is_active(UserId(1)).await);
        assert!(reg.close(UserId(1)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_extends_and_idle_relays_expire() {
        let reg = RelayRegistry::new(Duration::from_secs(60));
        open(&reg, 1, 2).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(reg.touch(UserId(2)).await.is_some());
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(reg.is_active(UserId(1)).await);
        assert!(reg.sweep_expired().await.is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(reg.touch(UserId(1)).await.is_none());
        let expired = reg.sweep_expired().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(reg.active_count().await, 0);
    }
}
