use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::Result;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one unit for `key`. Never fails: limiter faults admit the call.
    async fn is_allowed(&self, key: &str) -> bool;

    /// Forget state for keys idle longer than `idle_for`.
    async fn purge_idle(&self, _idle_for: Duration) -> usize {
        0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bucket {
    pub tokens: f64,
    pub last_update: Instant,
}

/// Where buckets live. In-memory by default; the trait leaves room for a
/// shared store when several bot instances poll the same token.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Bucket>>;
    async fn save(&self, key: &str, bucket: Bucket) -> Result<()>;
    /// Forget buckets untouched for `idle_for`; returns how many were dropped.
    async fn purge_idle(&self, idle_for: Duration) -> Result<usize>;
}

#[derive(Default)]
pub struct MemoryBucketStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn load(&self, key: &str) -> Result<Option<Bucket>> {
        Ok(self.buckets.lock().await.get(key).copied())
    }

    async fn save(&self, key: &str, bucket: Bucket) -> Result<()> {
        self.buckets.lock().await.insert(key.to_string(), bucket);
        Ok(())
    }

    async fn purge_idle(&self, idle_for: Duration) -> Result<usize> {
        let now = Instant::now();
        let mut map = self.buckets.lock().await;
        let before = map.len();
        map.retain(|_, b| now.saturating_duration_since(b.last_update) < idle_for);
        Ok(before - map.len())
    }
}

/// Token bucket: `max_tokens` per `window`, refilled continuously.
pub struct TokenBucketLimiter {
    store: Arc<dyn BucketStore>,
    max_tokens: f64,
    refill_per_sec: f64,
    // Serializes load/modify/save so concurrent calls cannot double-spend.
    gate: Mutex<()>,
}

impl TokenBucketLimiter {
    pub fn new(store: Arc<dyn BucketStore>, max_tokens: u32, window: Duration) -> Self {
        let max_tokens = f64::from(max_tokens.max(1));
        let window_secs = window.as_secs_f64().max(1e-9);
        Self {
            store,
            max_tokens,
            refill_per_sec: max_tokens / window_secs,
            gate: Mutex::new(()),
        }
    }

    pub fn in_memory(max_tokens: u32, window: Duration) -> Self {
        Self::new(Arc::new(MemoryBucketStore::default()), max_tokens, window)
    }

    /// Refill `bucket` up to `now` and try to take one token. Returns the
    /// updated bucket, whether the call is admitted and, if not, the wait until
    /// the next token.
    fn take(&self, bucket: Option<Bucket>, now: Instant) -> (Bucket, bool, Option<Duration>) {
        let mut bucket = bucket.unwrap_or(Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return (bucket, true, None);
        }
        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        (bucket, false, Some(Duration::from_secs_f64(secs.max(0.0))))
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn is_allowed(&self, key: &str) -> bool {
        let _gate = self.gate.lock().await;
        let current = match self.store.load(key).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(key, error = %e, "bucket store unavailable, allowing");
                return true;
            }
        };

        let (bucket, allowed, retry_after) = self.take(current, Instant::now());
        if let Err(e) = self.store.save(key, bucket).await {
            tracing::warn!(key, error = %e, "bucket store write failed");
        }
        if !allowed {
            tracing::debug!(
                key,
                retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                "rate limited"
            );
        }
        allowed
    }

    async fn purge_idle(&self, idle_for: Duration) -> usize {
        match self.store.purge_idle(idle_for).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "rate limiter purge failed");
                0
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct NoopLimiter;

#[async_trait]
impl RateLimiter for NoopLimiter {
    async fn is_allowed(&self, _key: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    struct BrokenStore;

    #[async_trait]
    impl BucketStore for BrokenStore {
        async fn load(&self, _key: &str) -> Result<Option<Bucket>> {
            Err(Error::Storage("redis down".to_string()))
        }
        async fn save(&self, _key: &str, _bucket: Bucket) -> Result<()> {
            Err(Error::Storage("redis down".to_string()))
        }
        async fn purge_idle(&self, _idle_for: Duration) -> Result<usize> {
            Err(Error::Storage("redis down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_over_time() {
        let rl = TokenBucketLimiter::in_memory(2, Duration::from_secs(10));

        assert!(rl.is_allowed("u1").await);
        assert!(rl.is_allowed("u1").await);
        assert!(!rl.is_allowed("u1").await);
        assert!(rl.is_allowed("u2").await);

        // 2 tokens per 10s: one token back after 5s.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(rl.is_allowed("u1").await);
        assert!(!rl.is_allowed("u1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn take_reports_wait_until_next_token() {
        let rl = TokenBucketLimiter::in_memory(1, Duration::from_secs(4));
        let now = Instant::now();
        let (b, ok, _) = rl.take(None, now);
        assert!(ok);
        let (_, ok, wait) = rl.take(Some(b), now + Duration::from_secs(1));
        assert!(!ok);
        assert_eq!(wait, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn store_failure_degrades_to_allow() {
        let rl = TokenBucketLimiter::new(Arc::new(BrokenStore), 1, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(rl.is_allowed("u1").await);
        }
        assert_eq!(rl.purge_idle(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_buckets_are_purged() {
        let rl = TokenBucketLimiter::in_memory(1, Duration::from_secs(60));
        rl.is_allowed("a").await;
        tokio::time::advance(Duration::from_secs(120)).await;
        rl.is_allowed("b").await;
        assert_eq!(rl.purge_idle(Duration::from_secs(60)).await, 1);
    }
}
