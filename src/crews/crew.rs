//! # Crew Contract
//!
//! A crew is anything that turns a snapshot of the project record into a
//! [`CrewOutput`] asynchronously. The workflow engine depends on this trait
//! only; what a crew does internally (language models, task execution,
//! external calls) is opaque to it.

use crate::orchestration::OrchestrationError;
use crate::state_machine::conditions::resolve_path;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Read-only view handed to a crew invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewContext {
    pub project_id: String,
    pub workflow: String,
    /// State the crew is running for; loop iterations use `<prefix>_<n>`
    pub state: String,
    /// 1-based loop iteration, `None` outside loops
    pub iteration: Option<u32>,
    /// Full project record at dispatch time
    pub record: Value,
}

impl CrewContext {
    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.record, path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewStatus {
    #[default]
    Success,
    Error,
    Skipped,
}

impl fmt::Display for CrewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrewStatus::Success => write!(f, "success"),
            CrewStatus::Error => write!(f, "error"),
            CrewStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of one crew invocation.
///
/// `status: error` is a definitive business outcome (for example a rejected
/// idea); the engine never retries it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CrewOutput {
    pub status: CrewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    /// Jump target inside the current workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<String>,
}

impl CrewOutput {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CrewStatus::Error,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: CrewStatus::Skipped,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        match data {
            Value::Object(map) => self.data = map,
            Value::Null => {}
            other => {
                self.data.insert("result".to_string(), other);
            }
        }
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_next_state(mut self, state: impl Into<String>) -> Self {
        self.next_state = Some(state.into());
        self
    }

    /// Parse the loosely-typed `{status, message?, data?, next_state?}` shape
    pub fn from_value(value: Value) -> Result<Self, CrewError> {
        serde_json::from_value(value).map_err(|e| CrewError::InvalidOutput(e.to_string()))
    }
}

/// Failure raised by a crew; the engine treats every variant as a failed step
#[derive(Debug, Error)]
pub enum CrewError {
    #[error("Crew failed: {0}")]
    Failed(String),

    #[error("Crew received an unusable context: {0}")]
    InvalidContext(String),

    #[error("Crew returned an invalid output: {0}")]
    InvalidOutput(String),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait Crew: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, context: CrewContext) -> Result<CrewOutput, CrewError>;
}

type CrewFn = dyn Fn(CrewContext) -> BoxFuture<'static, Result<CrewOutput, CrewError>> + Send + Sync;

/// Crew backed by an async closure
pub struct FnCrew {
    name: String,
    handler: Arc<CrewFn>,
}

impl FnCrew {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CrewContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CrewOutput, CrewError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |context| Box::pin(handler(context))),
        }
    }
}

impl fmt::Debug for FnCrew {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCrew").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Crew for FnCrew {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, context: CrewContext) -> Result<CrewOutput, CrewError> {
        (self.handler)(context).await
    }
}
