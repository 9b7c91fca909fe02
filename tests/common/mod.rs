#![allow(dead_code)]

pub mod crews;
pub mod registries;
pub mod runners;
pub mod strategies;

pub use crews::*;
pub use registries::*;
pub use runners::*;

use std::time::Duration;
use studio_core::{ExecutorConfig, RetryConfig};

/// Executor settings with millisecond backoffs and no step-level retries
pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        step_retry: RetryConfig {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
            jitter_factor: 0.0,
            min_delay: Duration::from_millis(1),
        },
        infer_dependencies: false,
        reservation_timeout: Duration::from_secs(2),
        ..ExecutorConfig::default()
    }
}
