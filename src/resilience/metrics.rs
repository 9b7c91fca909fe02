//! Call accounting for circuit breakers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters collected by a [`CircuitBreaker`](crate::resilience::CircuitBreaker)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls refused while the breaker was open
    pub rejected_calls: u64,
    pub consecutive_failures: u32,
    pub state_transitions: u64,
    pub total_duration: Duration,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures over executed calls, 0.0 when nothing ran yet
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_calls as f64
        }
    }

    pub fn average_duration(&self) -> Duration {
        if self.total_calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.total_calls as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_on_empty_metrics() {
        let metrics = CircuitBreakerMetrics::new();
        assert_eq!(metrics.failure_rate(), 0.0);
        assert_eq!(metrics.average_duration(), Duration::ZERO);
    }

    #[test]
    fn test_failure_rate() {
        let metrics = CircuitBreakerMetrics {
            total_calls: 4,
            failure_count: 1,
            success_count: 3,
            total_duration: Duration::from_millis(400),
            ..Default::default()
        };
        assert!((metrics.failure_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(metrics.average_duration(), Duration::from_millis(100));
    }
}
