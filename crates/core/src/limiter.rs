//! # Rate Limiter
//!
//! Token-bucket admission control, one bucket per client identifier. Sits at
//! the ingress boundary ahead of the engine and has no data dependency on it.
//! Buckets idle past a threshold are swept periodically to bound memory.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Limiter tuning
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained admission rate
    pub requests_per_minute: u32,
    /// Bucket capacity (burst allowance)
    pub burst_size: u32,
    /// Minimum spacing between cleanup sweeps
    pub cleanup_interval: Duration,
    /// Buckets idle longer than this are dropped
    pub idle_timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
            cleanup_interval: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Admission decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            refill_rate,
            last_update: Instant::now(),
        }
    }

    /// Refill from elapsed wall-clock time, then try to take one token
    fn consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u32 {
        self.tokens as u32
    }
}

struct LimiterInner {
    buckets: HashMap<String, TokenBucket>,
    last_cleanup: Instant,
}

/// Per-client token-bucket rate limiter
pub struct RateLimiter {
    config: RateLimiterConfig,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        tracing::info!(
            "rate limiter initialized: {}/min, burst={}",
            config.requests_per_minute,
            config.burst_size
        );
        Self {
            config,
            inner: Mutex::new(LimiterInner {
                buckets: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.config.requests_per_minute
    }

    /// Check whether a request from `client_id` is admitted
    pub async fn check(&self, client_id: &str) -> Admission {
        let mut inner = self.inner.lock().await;

        // Opportunistic sweep, at most once per interval
        if inner.last_cleanup.elapsed() >= self.config.cleanup_interval {
            let idle = self.config.idle_timeout;
            let before = inner.buckets.len();
            inner
                .buckets
                .retain(|_, bucket| bucket.last_update.elapsed() <= idle);
            let removed = before - inner.buckets.len();
            if removed > 0 {
                tracing::debug!("cleaned up {removed} inactive rate limit buckets");
            }
            inner.last_cleanup = Instant::now();
        }

        let refill_rate = f64::from(self.config.requests_per_minute) / 60.0;
        let burst = self.config.burst_size;
        let bucket = inner
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| TokenBucket::new(burst, refill_rate));

        let allowed = bucket.consume();
        if !allowed {
            tracing::warn!("rate limit exceeded for {client_id}");
        }

        Admission {
            allowed,
            remaining: bucket.remaining(),
        }
    }

    #[cfg(test)]
    async fn bucket_count(&self) -> usize {
        self.inner.lock().await.buckets.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_per_second() -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_minute: 60,
            burst_size: 10,
            ..RateLimiterConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_deny() {
        let limiter = RateLimiter::new(one_per_second());

        for i in 0..10 {
            let admission = limiter.check("10.0.0.1").await;
            assert!(admission.allowed, "request {i} should be admitted");
        }

        let denied = limiter.check("10.0.0.1").await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_one_token_per_second() {
        let limiter = RateLimiter::new(one_per_second());
        for _ in 0..10 {
            let _ = limiter.check("10.0.0.1").await;
        }
        assert!(!limiter.check("10.0.0.1").await.allowed);

        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(limiter.check("10.0.0.1").await.allowed);
        assert!(!limiter.check("10.0.0.1").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_do_not_share_buckets() {
        let limiter = RateLimiter::new(one_per_second());
        for _ in 0..10 {
            let _ = limiter.check("10.0.0.1").await;
        }

        assert!(!limiter.check("10.0.0.1").await.allowed);
        assert!(limiter.check("10.0.0.2").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_buckets_are_swept() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            cleanup_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
            ..one_per_second()
        });

        let _ = limiter.check("10.0.0.1").await;
        assert_eq!(limiter.bucket_count().await, 1);

        // Idle past the threshold; the next check from another client sweeps
        tokio::time::advance(Duration::from_secs(180)).await;
        let _ = limiter.check("10.0.0.2").await;

        assert_eq!(limiter.bucket_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = RateLimiter::new(one_per_second());
        let _ = limiter.check("10.0.0.1").await;

        // A long quiet period must not bank more than the burst size
        tokio::time::advance(Duration::from_secs(3600)).await;

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1").await.allowed);
        }
        assert!(!limiter.check("10.0.0.1").await.allowed);
    }
}
