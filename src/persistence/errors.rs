//! Persistence error types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error during {operation} on {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error for {id}: {source}")]
    Serialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timed out after {timeout:?} waiting for storage lock {}", .path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("Integrity check failed for {id} and no valid backup was found")]
    IntegrityFailure { id: String },

    #[error("Invalid storage id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },
}

impl PersistenceError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
