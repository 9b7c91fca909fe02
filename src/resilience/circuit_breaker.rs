//! # Circuit Breaker Implementation
//!
//! Fault isolation for unreliable downstream operations. The breaker follows the
//! classic three-state pattern: Closed (normal operation), Open (failing fast)
//! and Half-Open (admitting probes after the cool-down).
//!
//! Transitions are count- and time-driven:
//!
//! - Closed → Open once `failure_threshold` consecutive failures are recorded
//! - Open → Half-Open once `timeout` has elapsed since the last failure
//! - Half-Open → Closed on the next success, resetting the failure counter
//! - Half-Open → Open on the next failure
//!
//! The admission check and the outcome recording are synchronous so the same
//! breaker can guard both async calls ([`CircuitBreaker::call`]) and lock-held
//! critical sections such as resource allocation.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - calls are admitted as probes
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation ran and failed; the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }
}

/// Observable snapshot of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub timeout_seconds: f64,
}

#[derive(Debug)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Core circuit breaker with atomic state and mutex-guarded bookkeeping
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for cheap reads)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerInner {
                metrics: CircuitBreakerMetrics::new(),
                last_failure: None,
                last_failure_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// When the breaker is open the operation is never invoked and
    /// [`CircuitBreakerError::CircuitOpen`] is returned immediately.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Admission check, moving Open → Half-Open once the cool-down has passed.
    ///
    /// A refused admission is counted as a rejected call.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    inner.metrics.rejected_calls += 1;
                    debug!(component = %self.name, "⛔ Call rejected, circuit open");
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;

        match self.state() {
            CircuitState::HalfOpen => {
                inner.metrics.consecutive_failures = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => {
                inner.metrics.consecutive_failures = 0;
            }
            CircuitState::Open => {
                // A call admitted before the breaker tripped finished late
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;
        inner.metrics.consecutive_failures = inner.metrics.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        debug!(
            component = %self.name,
            consecutive_failures = inner.metrics.consecutive_failures,
            duration_ms = duration.as_millis() as u64,
            "🔴 Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                if inner.metrics.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = self.state();
        if from == to {
            return;
        }
        self.state.store(to as u8, Ordering::Release);
        inner.metrics.state_transitions += 1;

        match to {
            CircuitState::Open => warn!(
                component = %self.name,
                consecutive_failures = inner.metrics.consecutive_failures,
                timeout_ms = self.config.timeout.as_millis() as u64,
                "🔴 Circuit breaker opened (failing fast)"
            ),
            CircuitState::HalfOpen => info!(
                component = %self.name,
                "🟡 Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => info!(
                component = %self.name,
                total_calls = inner.metrics.total_calls,
                "🟢 Circuit breaker closed (recovered)"
            ),
        }
    }

    /// Force circuit open (for emergency situations)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        warn!(component = %self.name, "⚠️ Circuit breaker manually forced open");
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Force circuit closed and clear the failure streak
    pub fn force_closed(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.consecutive_failures = 0;
        inner.last_failure = None;
        warn!(component = %self.name, "⚠️ Circuit breaker manually forced closed");
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    /// State, failure streak and last failure time for observability
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: self.state(),
            failure_count: inner.metrics.consecutive_failures,
            last_failure_time: inner.last_failure_at,
            failure_threshold: self.config.failure_threshold,
            timeout_seconds: self.config.timeout.as_secs_f64(),
        }
    }

    /// Healthy means closed, or half-open with no failure since the probe began
    pub fn is_healthy(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.inner.lock().metrics.consecutive_failures == 0,
            CircuitState::Open => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new(threshold, Duration::from_millis(timeout_ms)),
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("boom") }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let cb = breaker(3, 1000);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_healthy());

        let result = cb.call(|| async { Ok::<_, &str>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(cb.metrics().success_count, 1);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let cb = breaker(3, 60_000);
        for _ in 0..3 {
            assert!(fail(&cb).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let invocations = &AtomicU32::new(0);
        let result = cb
            .call(|| async move {
                invocations.fetch_add(1, AtomicOrdering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(invocations.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 60_000);
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        cb.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.status().failure_count, 2);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let cb = breaker(2, 20);
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = cb.call(|| async { Ok::<_, &str>("probe") }).await;
        assert_eq!(result.unwrap(), "probe");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.status().failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 20);
        fail(&cb).await.ok();
        fail(&cb).await.ok();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let probe = fail(&cb).await;
        assert!(matches!(probe, Err(CircuitBreakerError::OperationFailed("boom"))));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(fail(&cb).await.unwrap_err().is_circuit_open());
    }

    #[test]
    fn test_status_reports_last_failure() {
        let cb = breaker(5, 1000);
        assert!(cb.status().last_failure_time.is_none());
        cb.record_failure(Duration::from_millis(1));
        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
        assert!(status.last_failure_time.is_some());
        assert_eq!(status.failure_threshold, 5);
    }

    #[test]
    fn test_force_open_and_closed() {
        let cb = breaker(5, 60_000);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());

        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(
            serde_json::to_value(CircuitState::HalfOpen).unwrap(),
            serde_json::json!("HALF_OPEN")
        );
    }
}
