//! # Resilience Module
//!
//! Fault tolerance primitives used by the orchestration core.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: fail fast while a downstream keeps failing, probe again after a cool-down
//! - **Retry Manager**: exponential backoff with jitter, driven by [`ErrorCategory`] classification
//! - **Metrics**: call counts and durations per breaker
//!
//! ## Usage
//!
//! ```rust,no_run
//! use studio_core::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryManager};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("llm_calls", CircuitBreakerConfig::new(5, Duration::from_secs(60)));
//! let retry = RetryManager::new(RetryConfig::default());
//!
//! let result = breaker
//!     .call(|| retry.execute_with_retry("fetch", || async { Ok::<_, std::io::Error>("done") }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState};
pub use config::{CircuitBreakerConfig, RetryConfig};
pub use metrics::CircuitBreakerMetrics;
pub use retry::{ErrorCategory, RetryManager, Retryable};
