//! # Studio Configuration
//!
//! Typed configuration for every component of the studio core, loaded from
//! `studio-config.yaml` with per-environment sections and `STUDIO__*`
//! environment variable overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use studio_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let executor = manager.config().executor_config();
//! let catalog = manager.load_workflow_catalog()?;
//! # let _ = (executor, catalog);
//! # Ok(())
//! # }
//! ```
//!
//! Every section and field has a default, so an empty file (or none at all)
//! yields the same configuration as [`StudioConfig::default`].

pub mod error;
pub mod loader;

use crate::constants::{
    DEFAULT_BACKUP_RETENTION, DEFAULT_CHECKPOINT_HISTORY, DEFAULT_CREW_TIMEOUT_SECONDS,
    DEFAULT_MAX_TRANSITIONS, DEFAULT_WORKFLOW,
};
use crate::orchestration::{ExecutorConfig, ResourceKind, ResourceManagerConfig};
use crate::persistence::PersistenceConfig;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::state_machine::{LivelockConfig, WorkflowEngineConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring studio-config.yaml
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StudioConfig {
    pub resources: ResourcesConfig,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub executor: ExecutorSettings,
    pub persistence: PersistenceSettings,
    pub workflow: WorkflowSettings,
}

/// Resource pool capacities and allocation policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub cpu: u64,
    pub memory: u64,
    pub network: u64,
    pub external_api: u64,
    /// Additional named pools
    pub custom: BTreeMap<String, u64>,
    pub max_waiting: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            cpu: 100,
            memory: 200,
            network: 50,
            external_api: 50,
            custom: BTreeMap::new(),
            max_waiting: 20,
            max_attempts: 3,
            initial_backoff_ms: 100,
            backoff_multiplier: 1.5,
            max_backoff_ms: 1000,
            failure_threshold: 10,
            cooldown_seconds: 10,
        }
    }
}

/// Step-level retry policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    pub min_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            min_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub max_concurrent_tasks: usize,
    pub checkpoint_interval: usize,
    pub failure_retry_limit: u32,
    pub step_timeout_seconds: u64,
    pub reservation_timeout_ms: u64,
    pub infer_dependencies: bool,
    pub checkpoint_history: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            checkpoint_interval: 5,
            failure_retry_limit: 3,
            step_timeout_seconds: 3600,
            reservation_timeout_ms: 5000,
            infer_dependencies: true,
            checkpoint_history: DEFAULT_CHECKPOINT_HISTORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub root: PathBuf,
    pub lock_timeout_ms: u64,
    pub lock_poll_interval_ms: u64,
    pub backup_retention: usize,
    pub checkpoint_retention: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/execution_state"),
            lock_timeout_ms: 5000,
            lock_poll_interval_ms: 25,
            backup_retention: DEFAULT_BACKUP_RETENTION,
            checkpoint_retention: DEFAULT_CHECKPOINT_HISTORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// YAML workflow catalog; the built-in catalog is used when unset
    pub definitions_path: Option<PathBuf>,
    pub default_workflow: String,
    pub max_transitions: usize,
    pub crew_timeout_seconds: u64,
    pub history_limit: usize,
    pub livelock_history_size: usize,
    pub livelock_repeat_threshold: usize,
    pub livelock_alternating_window: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        let livelock = LivelockConfig::default();
        Self {
            definitions_path: None,
            default_workflow: DEFAULT_WORKFLOW.to_string(),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            crew_timeout_seconds: DEFAULT_CREW_TIMEOUT_SECONDS,
            history_limit: 100,
            livelock_history_size: livelock.history_size,
            livelock_repeat_threshold: livelock.repeat_threshold,
            livelock_alternating_window: livelock.alternating_window,
        }
    }
}

impl StudioConfig {
    pub fn resource_manager_config(&self) -> ResourceManagerConfig {
        let r = &self.resources;
        let mut capacities = BTreeMap::from([
            (ResourceKind::Cpu, r.cpu),
            (ResourceKind::Memory, r.memory),
            (ResourceKind::Network, r.network),
            (ResourceKind::ExternalApi, r.external_api),
        ]);
        for (name, capacity) in &r.custom {
            capacities.insert(ResourceKind::from(name.as_str()), *capacity);
        }
        ResourceManagerConfig {
            capacities,
            max_waiting: r.max_waiting,
            max_attempts: r.max_attempts,
            initial_backoff: Duration::from_millis(r.initial_backoff_ms),
            backoff_multiplier: r.backoff_multiplier,
            max_backoff: Duration::from_millis(r.max_backoff_ms),
            failure_threshold: r.failure_threshold,
            cooldown: Duration::from_secs(r.cooldown_seconds),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            jitter_factor: self.retry.jitter_factor,
            min_delay: Duration::from_millis(self.retry.min_delay_ms),
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.circuit_breaker.failure_threshold,
            Duration::from_secs(self.circuit_breaker.timeout_seconds),
        )
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let e = &self.executor;
        ExecutorConfig {
            max_concurrent_tasks: e.max_concurrent_tasks,
            checkpoint_interval: e.checkpoint_interval,
            failure_retry_limit: e.failure_retry_limit,
            circuit_breaker: self.circuit_breaker_config(),
            step_timeout: Duration::from_secs(e.step_timeout_seconds),
            reservation_timeout: Duration::from_millis(e.reservation_timeout_ms),
            infer_dependencies: e.infer_dependencies,
            checkpoint_history: e.checkpoint_history,
            step_retry: self.retry_config(),
        }
    }

    pub fn persistence_config(&self) -> PersistenceConfig {
        let p = &self.persistence;
        PersistenceConfig {
            root: p.root.clone(),
            lock_timeout: Duration::from_millis(p.lock_timeout_ms),
            lock_poll_interval: Duration::from_millis(p.lock_poll_interval_ms),
            backup_retention: p.backup_retention,
            checkpoint_retention: p.checkpoint_retention,
        }
    }

    pub fn engine_config(&self) -> WorkflowEngineConfig {
        let w = &self.workflow;
        WorkflowEngineConfig {
            max_transitions: w.max_transitions,
            crew_timeout: Duration::from_secs(w.crew_timeout_seconds),
            livelock: LivelockConfig {
                history_size: w.livelock_history_size,
                repeat_threshold: w.livelock_repeat_threshold,
                alternating_window: w.livelock_alternating_window,
            },
            history_limit: w.history_limit,
        }
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> ConfigResult<()> {
        let r = &self.resources;
        if r.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "resources.max_attempts",
                r.max_attempts,
                "at least one allocation attempt is required",
            ));
        }
        if r.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "resources.backoff_multiplier",
                r.backoff_multiplier,
                "must be >= 1.0",
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_factor",
                self.retry.backoff_factor,
                "must be >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                self.retry.jitter_factor,
                "must be within [0.0, 1.0]",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                self.retry.base_delay_ms,
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.failure_threshold",
                0,
                "must be at least 1",
            ));
        }
        if self.persistence.backup_retention == 0 {
            return Err(ConfigurationError::invalid_value(
                "persistence.backup_retention",
                0,
                "at least one backup is needed for recovery",
            ));
        }
        if self.workflow.default_workflow.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "workflow.default_workflow",
                "",
                "must name a workflow",
            ));
        }
        self.executor_config()
            .validate()
            .map_err(|e| ConfigurationError::invalid_value("executor", "-", e.to_string()))?;
        self.engine_config()
            .validate()
            .map_err(|e| ConfigurationError::invalid_value("workflow", "-", e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_component_defaults() {
        let config = StudioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resource_manager_config(), ResourceManagerConfig::default());
        assert_eq!(config.retry_config(), RetryConfig::default());
        assert_eq!(config.persistence_config(), PersistenceConfig::default());
        assert_eq!(config.engine_config(), WorkflowEngineConfig::default());
    }

    #[test]
    fn test_custom_pools_become_resource_kinds() {
        let mut config = StudioConfig::default();
        config.resources.custom.insert("gpu".into(), 4);
        let capacities = config.resource_manager_config().capacities;
        assert_eq!(capacities.get(&ResourceKind::Custom("gpu".into())), Some(&4));
        assert_eq!(capacities.len(), 5);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = StudioConfig::default();
        config.retry.jitter_factor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "retry.jitter_factor"
        ));

        let mut config = StudioConfig::default();
        config.executor.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());

        let mut config = StudioConfig::default();
        config.workflow.max_transitions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: StudioConfig = serde_yaml::from_str(
            "executor:\n  max_concurrent_tasks: 4\nworkflow:\n  max_transitions: 12\n",
        )
        .unwrap();
        assert_eq!(config.executor.max_concurrent_tasks, 4);
        assert_eq!(config.executor.checkpoint_interval, 5);
        assert_eq!(config.workflow.max_transitions, 12);
        assert_eq!(config.workflow.default_workflow, DEFAULT_WORKFLOW);
    }
}
