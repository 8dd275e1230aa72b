//! Circuit breakers guarding side-effecting collaborators.
//!
//! ```text
//! Closed --[threshold consecutive failures]--> Open
//! Open --[cooldown elapsed]--> HalfOpen (one trial call admitted)
//! HalfOpen --[trial succeeds]--> Closed
//! HalfOpen --[trial fails]--> Open (fresh cooldown)
//! ```

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub times_opened: u64,
    /// Remaining cooldown while open.
    pub retry_in: Option<Duration>,
}

pub trait CircuitBreaker: Send + Sync {
    fn state(&self) -> BreakerState;

    /// Ask to make a call. While half-open only the first caller is admitted;
    /// that caller must report back through `record_success`/`record_failure`.
    fn should_allow(&self) -> bool;

    fn record_success(&self);
    fn record_failure(&self);

    /// Force the breaker closed (admin intervention).
    fn reset(&self);

    fn snapshot(&self) -> BreakerSnapshot;
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    times_opened: u64,
}

/// Production breaker: opens after `threshold` consecutive failures.
#[derive(Debug)]
pub struct ConsecutiveFailureBreaker {
    name: &'static str,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl ConsecutiveFailureBreaker {
    pub fn new(name: &'static str, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
                times_opened: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooled_down(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .map(|at| at.elapsed() >= self.cooldown)
            .unwrap_or(true)
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
        inner.times_opened += 1;
        tracing::warn!(
            breaker = self.name,
            failures = inner.failures,
            cooldown_secs = self.cooldown.as_secs(),
            "circuit opened"
        );
    }
}

impl CircuitBreaker for ConsecutiveFailureBreaker {
    fn state(&self) -> BreakerState {
        let inner = self.lock();
        match inner.state {
            BreakerState::Open if self.cooled_down(&inner) => BreakerState::HalfOpen,
            s => s,
        }
    }

    fn should_allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if !self.cooled_down(&inner) {
                    return false;
                }
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(breaker = self.name, "circuit half-open, admitting a trial call");
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return false;
                }
                inner.trial_in_flight = true;
                true
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!(breaker = self.name, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        match inner.state {
            BreakerState::HalfOpen => self.open(&mut inner),
            BreakerState::Closed if inner.failures >= self.threshold => self.open(&mut inner),
            // Late failure of a call admitted before the breaker opened.
            _ => {}
        }
    }

    fn reset(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        tracing::info!(breaker = self.name, "circuit reset");
    }

    fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let state = match inner.state {
            BreakerState::Open if self.cooled_down(&inner) => BreakerState::HalfOpen,
            s => s,
        };
        let retry_in = match (state, inner.opened_at) {
            (BreakerState::Open, Some(at)) => Some(self.cooldown.saturating_sub(at.elapsed())),
            _ => None,
        };
        BreakerSnapshot {
            state,
            failure_count: inner.failures,
            times_opened: inner.times_opened,
            retry_in,
        }
    }
}

/// Always-closed breaker used when resilience is disabled.
#[derive(Debug, Default)]
pub struct NoopBreaker;

impl CircuitBreaker for NoopBreaker {
    fn state(&self) -> BreakerState {
        BreakerState::Closed
    }
    fn should_allow(&self) -> bool {
        true
    }
    fn record_success(&self) {}
    fn record_failure(&self) {}
    fn reset(&self) {}
    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: BreakerState::Closed,
            failure_count: 0,
            times_opened: 0,
            retry_in: None,
        }
    }
}

/// Result of a call made through a breaker.
#[derive(Debug)]
pub enum Guarded<E> {
    /// The breaker refused the call; the operation was not attempted.
    Unavailable,
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for Guarded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("circuit open"),
            Self::Inner(e) => e.fmt(f),
        }
    }
}

/// Records a failure if the guarded future is dropped before it finishes, so a
/// cancelled half-open trial cannot wedge the breaker.
struct Outcome<'a> {
    breaker: &'a dyn CircuitBreaker,
    settled: bool,
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure();
        }
    }
}

/// Decides whether an error from a guarded call counts against the breaker.
pub trait BreakerFailure {
    fn trips_breaker(&self) -> bool;
}

impl BreakerFailure for crate::Error {
    /// A rejection is an answer from a healthy collaborator.
    fn trips_breaker(&self) -> bool {
        !self.is_rejected()
    }
}

impl BreakerFailure for &str {
    fn trips_breaker(&self) -> bool {
        true
    }
}

/// Run `fut` through `breaker`, returning `Guarded::Unavailable` without
/// polling it when the breaker refuses.
pub async fn guarded<T, E, F>(breaker: &dyn CircuitBreaker, fut: F) -> Result<T, Guarded<E>>
where
    E: BreakerFailure,
    F: Future<Output = Result<T, E>>,
{
    if !breaker.should_allow() {
        return Err(Guarded::Unavailable);
    }
    let mut outcome = Outcome {
        breaker,
        settled: false,
    };
    let res = fut.await;
    outcome.settled = true;
    match res {
        Ok(v) => {
            breaker.record_success();
            Ok(v)
        }
        Err(e) if e.trips_breaker() => {
            breaker.record_failure();
            Err(Guarded::Inner(e))
        }
        Err(e) => {
            breaker.record_success();
            Err(Guarded::Inner(e))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Transport,
    Storage,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport",
            Self::Storage => "storage",
        })
    }
}

/// One breaker per guarded capability, shared across users.
pub struct Breakers {
    transport: Arc<dyn CircuitBreaker>,
    storage: Arc<dyn CircuitBreaker>,
}

impl Breakers {
    pub fn new(transport: Arc<dyn CircuitBreaker>, storage: Arc<dyn CircuitBreaker>) -> Self {
        Self { transport, storage }
    }

    pub fn production(threshold: u32, cooldown: Duration) -> Self {
        Self::new(
            Arc::new(ConsecutiveFailureBreaker::new("transport", threshold, cooldown)),
            Arc::new(ConsecutiveFailureBreaker::new("storage", threshold, cooldown)),
        )
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopBreaker), Arc::new(NoopBreaker))
    }

    pub fn get(&self, capability: Capability) -> &dyn CircuitBreaker {
        match capability {
            Capability::Transport => self.transport.as_ref(),
            Capability::Storage => self.storage.as_ref(),
        }
    }

    pub fn snapshots(&self) -> Vec<(Capability, BreakerSnapshot)> {
        [Capability::Transport, Capability::Storage]
            .into_iter()
            .map(|c| (c, self.get(c).snapshot()))
            .collect()
    }

    pub fn reset_all(&self) {
        self.transport.reset();
        self.storage.reset();
    }
}
