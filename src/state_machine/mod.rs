//! # Workflow State Machine
//!
//! Declarative workflows (YAML or built in), guard conditions, record
//! merging, livelock detection and the [`WorkflowEngine`] that drives a
//! [`ProjectState`] through them.

pub mod conditions;
pub mod errors;
pub mod livelock;
pub mod merge;
pub mod project;
pub mod workflow;
pub mod workflow_engine;

pub use conditions::{evaluate_all, resolve_path, Comparison, Condition, Operator};
pub use errors::{WorkflowError, WorkflowResult};
pub use livelock::{Livelock, LivelockConfig, LivelockDetector};
pub use merge::{deep_merge, merge_crew_data};
pub use project::{ProjectState, START_STATE};
pub use workflow::{
    EscalationPolicy, LoopSpec, LoopStep, ParallelStep, StateStep, StepDefinition,
    WorkflowCatalog, WorkflowDefinition,
};
pub use workflow_engine::{
    ExecutionSummary, Transition, TransitionKind, WorkflowEngine, WorkflowEngineConfig,
    WorkflowInfo, WorkflowRun,
};
