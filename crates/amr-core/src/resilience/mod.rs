//! Guards around side-effecting operations.
//!
//! Each primitive has a production implementation and a no-op one; `Core`
//! picks between them from `RESILIENCE_ENABLED` at startup.

pub mod breaker;
pub mod limiter;
pub mod locks;
pub mod rollback;

pub use breaker::{
    guarded, BreakerFailure, BreakerSnapshot, BreakerState, Breakers, Capability, CircuitBreaker,
    ConsecutiveFailureBreaker, Guarded, NoopBreaker,
};
pub use limiter::{NoopLimiter, RateLimiter, TokenBucketLimiter};
pub use locks::{LockGuard, LockManager, LockTimeout};
pub use rollback::{RollbackId, RollbackKind, RollbackManager, RollbackOutcome};
