//! # Retry Manager
//!
//! Exponential backoff with jitter for arbitrary async operations.
//!
//! The delay before retry `n` (zero-based) is
//! `min(max_delay, base_delay * backoff_factor^n)`, perturbed uniformly by
//! `±jitter_factor * delay` and floored at `min_delay`. Errors are classified
//! through [`Retryable`]; only retryable categories are attempted again, so
//! input and programming mistakes surface on their first occurrence.

use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Error categories driving retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Temporary failure expected to clear on its own
    Transient,
    Network,
    Timeout,
    RateLimit,
    ResourceExhaustion,
    /// Caller supplied bad arguments
    InvalidInput,
    /// Bug in the invoked code (type or attribute misuse)
    Programming,
    /// Definitive negative outcome
    Permanent,
    Configuration,
    Unknown,
}

impl ErrorCategory {
    /// Unknown errors are retried; only explicitly non-transient classes stop early
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::InvalidInput
                | ErrorCategory::Programming
                | ErrorCategory::Permanent
                | ErrorCategory::Configuration
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Programming => "programming",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Classification hook for errors passing through the retry manager
pub trait Retryable {
    fn category(&self) -> ErrorCategory;

    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl Retryable for std::io::Error {
    fn category(&self) -> ErrorCategory {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ErrorCategory::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => ErrorCategory::Network,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => ErrorCategory::InvalidInput,
            ErrorKind::Unsupported => ErrorCategory::Programming,
            _ => ErrorCategory::Transient,
        }
    }
}

/// Retries async operations according to a [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Policy hook deciding whether `error` deserves another attempt
    pub fn should_retry<E: Retryable>(&self, error: &E) -> bool {
        error.is_retryable()
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = base * self.config.backoff_factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.config.max_delay.as_secs_f64())
        } else {
            self.config.max_delay.as_secs_f64()
        };

        let jittered = if self.config.jitter_factor > 0.0 {
            let spread = self.config.jitter_factor * capped;
            capped + (fastrand::f64() * 2.0 - 1.0) * spread
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(self.config.min_delay.as_secs_f64()))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_retries + 1` attempts are spent. The last error is returned.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = %operation_name,
                            attempts = attempt + 1,
                            "✅ Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(&error) {
                        debug!(
                            operation = %operation_name,
                            category = %error.category(),
                            error = %error,
                            "Non-retryable error, giving up"
                        );
                        return Err(error);
                    }
                    if attempt >= self.config.max_retries {
                        warn!(
                            operation = %operation_name,
                            attempts = attempt + 1,
                            error = %error,
                            "❌ Retry budget exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.calculate_delay(attempt);
                    debug!(
                        operation = %operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        category = %error.category(),
                        error = %error,
                        "🔄 Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
