//! # Orchestration Engine
//!
//! Dependency-aware execution of work items produced by crews.
//!
//! ## Architecture
//!
//! - **DependencyGraph**: acyclic graph of work items with topological ordering,
//!   critical path and parallel group analysis
//! - **ResourceManager**: all-or-nothing reservations against finite pools,
//!   guarded by deadlock prevention and a circuit breaker
//! - **TaskExecutor**: the scheduling loop combining the graph, resources,
//!   retries, circuit breaking and checkpoints
//! - **Monitoring**: derived health indicators for each execution report
//!
//! ## Usage
//!
//! ```rust,no_run
//! use studio_core::orchestration::{ExecutorConfig, TaskExecutor, WorkItem};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = TaskExecutor::new(ExecutorConfig::default());
//! let report = executor
//!     .execute(vec![
//!         WorkItem::new("schema", "Design the schema"),
//!         WorkItem::new("api", "Build the API").with_dependency("schema"),
//!     ])
//!     .await?;
//! println!("{} -> {:?}", report.status, report.execution_order);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod dependency_graph;
pub mod errors;
pub mod monitoring;
pub mod resource_manager;
pub mod step_runner;
pub mod task_executor;
pub mod work_item;

pub use dependency_graph::{DependencyGraph, GraphValidation};
pub use errors::{OrchestrationError, OrchestrationResult, StepError};
pub use monitoring::{MonitoringReport, SystemStatus};
pub use resource_manager::{
    AllocatorStats, ReservationGuard, ResourceManager, ResourceManagerConfig, ResourceUtilization,
};
pub use step_runner::{SimulatedStepRunner, StepRunner};
pub use task_executor::{
    ExecutionReport, ExecutionStatus, ExecutorConfig, FailedWorkItem, TaskExecutor,
    WorkItemResult,
};
pub use work_item::{
    Checkpoint, Priority, ResourceKind, ResourceRequirement, WorkItem, WorkItemStatus,
};
