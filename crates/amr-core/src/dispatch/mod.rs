//! Ordered dispatch: every inbound event is offered to a static table of
//! predicate-guarded rules, lowest priority number first. The first rule whose
//! predicate accepts runs; nothing else sees the event.

pub mod event;
pub mod handlers;
pub mod rules;

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    audit::AuditEvent,
    conversation::ConversationState,
    domain::UpdateId,
    errors::Error,
    services::Core,
    Result,
};

use self::event::{EventKind, InboundEvent};

const SEEN_UPDATES: usize = 1024;

const FATAL_NOTICE: &str =
    "⚠️ Something went wrong and your draft was discarded. If this keeps happening, please contact an operator.";

/// What a predicate gets to look at: the event, its classification and the
/// user's state as loaded before any handler ran.
#[derive(Clone, Debug)]
pub struct Routed {
    pub event: InboundEvent,
    pub kind: EventKind,
    pub state: ConversationState,
    pub is_admin: bool,
    pub in_relay: bool,
}

pub type Predicate = fn(&Routed) -> bool;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, core: Arc<Core>, routed: Routed) -> Result<()>;
}

pub struct DispatchRule {
    pub name: &'static str,
    pub priority: u16,
    pub predicate: Predicate,
    pub handler: Arc<dyn Handler>,
}

impl DispatchRule {
    pub fn new(
        name: &'static str,
        priority: u16,
        predicate: Predicate,
        handler: impl Handler + 'static,
    ) -> Self {
        Self {
            name,
            priority,
            predicate,
            handler: Arc::new(handler),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled { rule: &'static str },
    /// A rule accepted but its handler failed; the failure was contained.
    Failed { rule: &'static str },
    Duplicate,
    Dropped,
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled { .. } | Self::Failed { .. })
    }
}

pub struct DispatcherBuilder {
    core: Arc<Core>,
    rules: Vec<DispatchRule>,
}

impl DispatcherBuilder {
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, rule: DispatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = DispatchRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Order the table. Two rules sharing a priority is a configuration error.
    pub fn build(mut self) -> Result<Dispatcher> {
        self.rules.sort_by_key(|r| r.priority);
        if let Some(pair) = self.rules.windows(2).find(|w| w[0].priority == w[1].priority) {
            return Err(Error::Config(format!(
                "dispatch rules {} and {} share priority {}",
                pair[0].name, pair[1].name, pair[0].priority
            )));
        }
        Ok(Dispatcher {
            core: self.core,
            rules: self.rules,
            seen: Mutex::new(SeenUpdates::default()),
        })
    }
}

#[derive(Default)]
struct SeenUpdates {
    order: VecDeque<UpdateId>,
    ids: HashSet<UpdateId>,
}

impl SeenUpdates {
    /// Remember `id`; false if it was already seen.
    fn insert(&mut self, id: UpdateId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_UPDATES {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}

pub struct Dispatcher {
    core: Arc<Core>,
    rules: Vec<DispatchRule>,
    seen: Mutex<SeenUpdates>,
}

impl Dispatcher {
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    pub async fn dispatch(&self, event: InboundEvent) -> DispatchOutcome {
        if !self.seen.lock().await.insert(event.update_id) {
            tracing::debug!(update_id = event.update_id.0, "duplicate update dropped");
            return DispatchOutcome::Duplicate;
        }

        let user_id = event.user_id;
        let _user_guard = self.core.locks.lock(&format!("user:{user_id}")).await;

        let routed = Routed {
            kind: EventKind::classify(&event),
            state: self.core.conversations.get(user_id).await,
            is_admin: self.core.cfg.is_admin(user_id),
            in_relay: self.core.relays.is_active(user_id).await,
            event,
        };

        let Some(rule) = self.rules.iter().find(|r| (r.predicate)(&routed)) else {
            tracing::debug!(
                update_id = routed.event.update_id.0,
                user_id = user_id.0,
                phase = %routed.state.kind(),
                "no rule accepted event"
            );
            if let Some(id) = &routed.event.callback_id {
                let _ = self.core.messenger.answer_callback_query(id, None).await;
            }
            return DispatchOutcome::Dropped;
        };

        tracing::debug!(
            update_id = routed.event.update_id.0,
            user_id = user_id.0,
            rule = rule.name,
            "dispatching"
        );

        let event = routed.event.clone();
        let phase = routed.state.kind();
        let mailbox_id = routed.state.mailbox_id.map(|m| m.0);
        let handler = rule.handler.clone();
        let core = self.core.clone();
        // Spawned so a panicking handler surfaces as a JoinError instead of
        // unwinding through the polling loop.
        let joined = tokio::spawn(async move { handler.handle(core, routed).await }).await;

        let error = match joined {
            Ok(Ok(())) => return DispatchOutcome::Handled { rule: rule.name },
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => "handler panicked".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::error!(
            update_id = event.update_id.0,
            user_id = user_id.0,
            mailbox_id = ?mailbox_id,
            phase = %phase,
            rule = rule.name,
            error = %error,
            "handler failed"
        );
        self.contain(rule.name, &event, &error).await;
        DispatchOutcome::Failed { rule: rule.name }
    }

    async fn contain(&self, rule: &str, event: &InboundEvent, error: &str) {
        self.core.conversations.clear(event.user_id).await;
        self.core
            .audit
            .record(AuditEvent::fatal(event.user_id, rule, error));
        if let Err(e) = self
            .core
            .messenger
            .send_html(event.user_id.into(), FATAL_NOTICE)
            .await
        {
            tracing::warn!(user_id = event.user_id.0, error = %e, "failed to notify user");
        }
        if let Some(id) = &event.callback_id {
            let _ = self.core.messenger.answer_callback_query(id, None).await;
        }
    }
}
