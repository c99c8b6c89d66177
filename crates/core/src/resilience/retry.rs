//! # Retry with Backoff
//!
//! Exponential-backoff retry around remote calls. The wait is a timed task
//! suspension, so one slow dependency never stalls sibling runs.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry policy for a remote call
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_retries: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Cap on the exponential delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Execute `op` with exponential backoff.
///
/// After each failure the delay is `min(base * 2^attempt, max)`. Once all
/// attempts are exhausted the last error is returned to the caller rather
/// than swallowed.
pub async fn retry_with_backoff<T, E, F, Fut>(mut op: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_retries {
                    tracing::error!("all {} attempts failed: {e}", config.max_retries);
                    return Err(e);
                }

                let exp = config
                    .base_delay
                    .saturating_mul(2u32.saturating_pow(attempt - 1));
                let delay = exp.min(config.max_delay);

                tracing::warn!(
                    "attempt {}/{} failed: {e}. Retrying in {:.1}s",
                    attempt,
                    config.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_ok;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result: Result<&str, String> = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("transient {n}"))
                } else {
                    Ok("recovered")
                }
            },
            &RetryConfig::default(),
        )
        .await;

        let value = tokio_test::assert_ok!(result);
        assert_eq!(value, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(format!("failure {n}"))
            },
            &RetryConfig::default(),
        )
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
        };

        let start = tokio::time::Instant::now();
        let _: Result<(), String> =
            retry_with_backoff(|| async { Err("always".to_string()) }, &config).await;

        // 10s + 15s + 15s + 15s between five attempts
        assert_eq!(start.elapsed(), Duration::from_secs(55));
    }
}
