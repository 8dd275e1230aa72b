//! Wiring of the core services around the external collaborators.

use std::{sync::Arc, time::Duration};

use crate::{
    audit::AuditLogger,
    compose::Composer,
    config::Config,
    conversation::ConversationStore,
    messaging::port::MessagingPort,
    ports::{PseudonymGenerator, SessionContext, Storage},
    publish::Publisher,
    relay::RelayRegistry,
    resilience::{
        Breakers, LockManager, NoopLimiter, RateLimiter, RollbackManager, TokenBucketLimiter,
    },
    schedule::DelayedSends,
};

const ROLLBACK_TTL: Duration = Duration::from_secs(3600);

/// Implementations of the ports, supplied by the binary (or by tests).
pub struct Collaborators {
    pub messenger: Arc<dyn MessagingPort>,
    pub storage: Arc<dyn Storage>,
    pub session: Arc<dyn SessionContext>,
    pub pseudonyms: Arc<dyn PseudonymGenerator>,
}

/// Everything a handler needs, shared by handle across tasks.
pub struct Core {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub storage: Arc<dyn Storage>,
    pub session: Arc<dyn SessionContext>,
    pub pseudonyms: Arc<dyn PseudonymGenerator>,
    pub conversations: Arc<ConversationStore>,
    pub breakers: Arc<Breakers>,
    pub limiter: Arc<dyn RateLimiter>,
    pub locks: Arc<LockManager>,
    pub rollback: Arc<RollbackManager>,
    pub relays: Arc<RelayRegistry>,
    pub audit: Arc<AuditLogger>,
    pub publisher: Arc<Publisher>,
    pub delayed: Arc<DelayedSends>,
    pub composer: Composer,
}

impl Core {
    pub fn new(cfg: Arc<Config>, c: Collaborators) -> Arc<Self> {
        let (breakers, limiter): (Breakers, Arc<dyn RateLimiter>) = if cfg.resilience_enabled {
            (
                Breakers::production(cfg.breaker_failure_threshold, cfg.breaker_cooldown),
                Arc::new(TokenBucketLimiter::in_memory(
                    cfg.rate_limit_requests,
                    cfg.rate_limit_window,
                )),
            )
        } else {
            tracing::warn!("resilience disabled: breakers and rate limiting are no-ops");
            (Breakers::noop(), Arc::new(NoopLimiter))
        };
        Self::with_guards(cfg, c, breakers, limiter)
    }

    pub fn with_guards(
        cfg: Arc<Config>,
        c: Collaborators,
        breakers: Breakers,
        limiter: Arc<dyn RateLimiter>,
    ) -> Arc<Self> {
        let breakers = Arc::new(breakers);
        let conversations = Arc::new(ConversationStore::new());
        let locks = Arc::new(LockManager::new());
        let rollback = Arc::new(RollbackManager::new(ROLLBACK_TTL));
        let relays = Arc::new(RelayRegistry::new(cfg.relay_ttl));
        let audit = Arc::new(AuditLogger::new(
            cfg.audit_log_path.clone(),
            cfg.audit_log_json,
        ));

        let delayed = Arc::new(DelayedSends::new());

        let publisher = Arc::new(Publisher::new(
            cfg.clone(),
            c.storage.clone(),
            c.messenger.clone(),
            breakers.clone(),
            locks.clone(),
            rollback.clone(),
        ));
        let composer = Composer::new(
            cfg.clone(),
            conversations.clone(),
            c.storage.clone(),
            c.session.clone(),
            c.pseudonyms.clone(),
            limiter.clone(),
            publisher.clone(),
            delayed.clone(),
            audit.clone(),
        );

        Arc::new(Self {
            cfg,
            messenger: c.messenger,
            storage: c.storage,
            session: c.session,
            pseudonyms: c.pseudonyms,
            conversations,
            breakers,
            limiter,
            locks,
            rollback,
            relays,
            audit,
            publisher,
            delayed,
            composer,
        })
    }
}
