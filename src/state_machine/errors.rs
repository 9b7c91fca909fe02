use std::path::PathBuf;
use thiserror::Error;

/// Structural problems with workflow definitions or engine wiring.
///
/// These are raised at load or construction time; runtime crew failures are
/// outcomes on the project, not errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid workflow YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("Workflow '{0}' is not defined")]
    UnknownWorkflow(String),

    #[error("Workflow '{workflow}' maps state '{state}' to unregistered crew '{crew}'")]
    MissingCrew {
        workflow: String,
        state: String,
        crew: String,
    },

    #[error("Invalid engine configuration: {0}")]
    Configuration(String),
}

impl WorkflowError {
    pub(crate) fn invalid(workflow: &str, reason: impl Into<String>) -> Self {
        WorkflowError::InvalidWorkflow {
            workflow: workflow.to_string(),
            reason: reason.into(),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
