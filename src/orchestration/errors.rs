//! Error types for the task orchestration layer.

use crate::resilience::{ErrorCategory, Retryable};
use thiserror::Error;

/// Errors raised while building or driving a dependency graph
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    #[error("Work item {id} already exists in the dependency graph")]
    DuplicateWorkItem { id: String },

    #[error("Work item {id} not found in the dependency graph")]
    WorkItemNotFound { id: String },

    #[error("Dependency {dependency} -> {dependent} would create a cycle: {}", .cycle.join(" -> "))]
    CycleDetected {
        dependent: String,
        dependency: String,
        cycle: Vec<String>,
    },

    #[error("Dependency graph is not acyclic, unresolved work items: {remaining:?}")]
    NotADag { remaining: Vec<String> },

    #[error("Invalid work item {id}: {reason}")]
    InvalidWorkItem { id: String, reason: String },

    #[error("Executor configuration error: {0}")]
    Configuration(String),

    #[error("Internal orchestration error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Structural errors are raised before any work item runs
    pub fn is_structural(&self) -> bool {
        !matches!(self, OrchestrationError::Internal(_))
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Failure of a single step of a work item
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{category} step failure: {message}")]
pub struct StepError {
    pub category: ErrorCategory,
    pub message: String,
}

impl StepError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidInput, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permanent, message)
    }
}

impl Retryable for StepError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}
