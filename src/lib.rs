#![allow(clippy::doc_markdown)] // Allow technical terms like YAML, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Studio Core
//!
//! Orchestration core for an AI product studio: a project idea is carried
//! through declarative workflows by pluggable crews, and the build phase runs
//! as a dependency-aware, resource-bounded task execution.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Workflow catalog, guard conditions and the [`WorkflowEngine`]
//! - [`crews`] - The [`Crew`] trait and the built-in [`BuilderCrew`]
//! - [`registry`] - Crew factories and project state registries
//! - [`orchestration`] - Work items, dependency graph, resource pools and the [`TaskExecutor`]
//! - [`resilience`] - Circuit breaker and retry policies
//! - [`persistence`] - Checksummed, atomically written state and checkpoints
//! - [`events`] - Broadcast event publisher
//! - [`metrics`] - Pluggable metrics recorder
//! - [`config`] - YAML and environment configuration
//! - [`logging`] - Structured logging setup and helpers
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use studio_core::{
//!     BuilderCrew, CrewOutput, CrewRegistry, FnCrew, ProjectState, TaskExecutor,
//!     WorkflowCatalog, WorkflowEngine, WorkflowEngineConfig, ExecutorConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(TaskExecutor::new(ExecutorConfig::default()));
//! let crews = CrewRegistry::new();
//! crews.register_instance("BuilderCrew", Arc::new(BuilderCrew::new(executor)));
//! for name in ["ValidatorCrew", "FeedbackCrew"] {
//!     crews.register_instance(name, Arc::new(FnCrew::new(name, |_ctx| async {
//!         Ok(CrewOutput::success())
//!     })));
//! }
//!
//! let engine = WorkflowEngine::new(
//!     Arc::new(WorkflowCatalog::builtin()),
//!     Arc::new(crews),
//!     WorkflowEngineConfig::default(),
//! )?;
//! let run = engine.run(ProjectState::new("project-1", "A habit tracker")).await?;
//! println!("finished in {}", run.project().state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod crews;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod orchestration;
pub mod persistence;
pub mod registry;
pub mod resilience;
pub mod state_machine;

pub use config::{ConfigManager, ConfigurationError, StudioConfig};
pub use crews::{BuilderCrew, Crew, CrewContext, CrewError, CrewOutput, CrewStatus, FnCrew};
pub use error::{Result, StudioError};
pub use events::{EventPublisher, StudioEvent};
pub use metrics::{InMemoryMetrics, MetricsRecorder, NoopMetrics};
pub use orchestration::{
    DependencyGraph, ExecutionReport, ExecutionStatus, ExecutorConfig, ResourceKind,
    ResourceManager, ResourceManagerConfig, ResourceRequirement, StepRunner, TaskExecutor,
    WorkItem, WorkItemStatus,
};
pub use persistence::{PersistenceConfig, PersistenceManager};
pub use registry::{
    CrewRegistry, InMemoryProjectRegistry, PersistentProjectRegistry, ProjectRegistry,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryManager};
pub use state_machine::{
    ProjectState, Transition, TransitionKind, WorkflowCatalog, WorkflowDefinition,
    WorkflowEngine, WorkflowEngineConfig, WorkflowRun,
};
