pub mod circuit;
pub mod retry;

pub use circuit::{
    BreakerRegistry, CircuitBreaker, CircuitConfig, CircuitError, CircuitState, CircuitStatus,
};
pub use retry::{retry_with_backoff, RetryConfig};
