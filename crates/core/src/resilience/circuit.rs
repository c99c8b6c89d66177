//! # Circuit Breaker
//!
//! Per-dependency failure isolation for remote calls. One breaker exists per
//! dependency name, held in a registry owned by the application context, and
//! may be shared by many concurrent runs. State mutation happens under a
//! mutex; the wrapped call itself runs outside the lock so unrelated traffic
//! is never serialized behind a slow dependency.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Health states of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, reject calls
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

/// Tuning knobs for one breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive-ish failures before opening
    pub failure_threshold: u32,
    /// Successes required to close from half-open
    pub success_threshold: u32,
    /// How long to stay open before probing
    pub timeout: Duration,
    /// Bound on each wrapped call
    pub call_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Rejection or failure surfaced by a breaker-guarded call
#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("circuit '{0}' is open; service unavailable")]
    Open(String),
    #[error("call through circuit '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    #[error(transparent)]
    Inner(#[from] anyhow::Error),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_state_change: Instant,
}

/// Serializable snapshot for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds since the most recent failure, if any
    pub seconds_since_failure: Option<f64>,
}

/// Circuit breaker for one named dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitConfig) -> Self {
        tracing::debug!("circuit breaker '{name}' initialized");
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                last_state_change: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Execute a call through the breaker.
    ///
    /// Rejected immediately with [`CircuitError::Open`] while open; once the
    /// open timeout has elapsed since the last failure, the breaker flips to
    /// half-open and lets the call through. Each admitted call is bounded by
    /// `call_timeout`, and a timeout counts as a failure.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T, CircuitError>
    where
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        self.admit().await?;

        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                tracing::warn!("circuit '{}' call failed: {e}", self.name);
                self.record_failure().await;
                Err(CircuitError::Inner(e))
            }
            Err(_) => {
                tracing::warn!("circuit '{}' call timed out", self.name);
                self.record_failure().await;
                Err(CircuitError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    /// Admission check; transitions open -> half-open when the window lapsed
    async fn admit(&self) -> Result<(), CircuitError> {
        let mut inner = self.inner.lock().await;

        if inner.state == CircuitState::Open {
            let lapsed = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.timeout)
                .unwrap_or(true);

            if !lapsed {
                return Err(CircuitError::Open(self.name.clone()));
            }

            tracing::info!("circuit '{}' transitioning to half-open", self.name);
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            inner.last_state_change = Instant::now();
        }

        Ok(())
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!("circuit '{}' closing after recovery", self.name);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.last_state_change = Instant::now();
                }
            }
            CircuitState::Closed => {
                // healthy traffic decays the failure count
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!("circuit '{}' reopening after half-open failure", self.name);
                inner.state = CircuitState::Open;
                inner.last_state_change = Instant::now();
            }
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        "circuit '{}' opening after {} failures",
                        self.name,
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    inner.last_state_change = Instant::now();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock().await;
        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            seconds_since_failure: inner.last_failure.map(|at| at.elapsed().as_secs_f64()),
        }
    }
}

/// Lazily-populated registry of breakers, one live instance per name.
///
/// Owned by the application context rather than a process global, so its
/// lifetime is tied to server start/stop.
pub struct BreakerRegistry {
    default_config: CircuitConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a dependency name
    pub async fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, self.default_config.clone()).await
    }

    /// Get or create with a dependency-specific config.
    ///
    /// The config only applies on first creation; an existing breaker keeps
    /// the config it was born with.
    pub async fn get_with(&self, name: &str, config: CircuitConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    /// Snapshot of every registered breaker
    pub async fn statuses(&self) -> Vec<CircuitStatus> {
        let breakers = self.breakers.lock().await;
        let mut out = Vec::with_capacity(breakers.len());
        for breaker in breakers.values() {
            out.push(breaker.status().await);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> CircuitConfig {
        CircuitConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitError> {
        breaker
            .call(async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await
            .map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitError> {
        breaker.call(async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("llm", fast_config());

        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }

        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking() {
        let breaker = CircuitBreaker::new("llm", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Open(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_then_closes() {
        let breaker = CircuitBreaker::new("llm", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        // First probe flips to half-open and is allowed through
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        // Second success reaches the threshold and closes the circuit
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.status().await.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("llm", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("slow", fast_config());

        let result = breaker
            .call(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Timeout { .. })));
        assert_eq!(breaker.status().await.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_decays_failure_count_while_closed() {
        let breaker = CircuitBreaker::new("llm", fast_config());

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.status().await.failure_count, 2);

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.status().await.failure_count, 1);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_returns_one_instance_per_name() {
        let registry = BreakerRegistry::default();

        let a = registry.get("model").await;
        let b = registry.get("model").await;
        assert!(Arc::ptr_eq(&a, &b));

        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "model");
    }
}
