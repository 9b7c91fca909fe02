//! # Error Types
//!
//! Crate-level error type for the studio orchestration core.
//!
//! Each component owns a focused error enum ([`OrchestrationError`],
//! [`PersistenceError`], [`WorkflowError`], [`ConfigurationError`]) and
//! converts into [`StudioError`] at the boundaries where several components meet,
//! mainly the [`WorkflowEngine`](crate::state_machine::WorkflowEngine).

use crate::config::ConfigurationError;
use crate::orchestration::OrchestrationError;
use crate::persistence::PersistenceError;
use crate::state_machine::WorkflowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StudioError {
    /// Structural errors are raised while building or validating inputs and
    /// never resolve by retrying.
    pub fn is_structural(&self) -> bool {
        match self {
            StudioError::Configuration(_) | StudioError::Workflow(_) | StudioError::Validation(_) => {
                true
            }
            StudioError::Orchestration(err) => err.is_structural(),
            StudioError::Persistence(_) | StudioError::Serialization(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StudioError>;
