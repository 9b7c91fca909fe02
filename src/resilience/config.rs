//! Runtime configuration for the resilience primitives.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker thresholds for one protected component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open
    pub failure_threshold: u32,

    /// Time since the last failure before an open breaker admits a probe
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            timeout,
        }
    }
}

/// Backoff policy for [`RetryManager`](crate::resilience::RetryManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts is `max_retries + 1`
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of the computed delay applied as uniform +/- jitter
    pub jitter_factor: f64,
    /// Floor applied after jitter
    pub min_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            min_delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}
