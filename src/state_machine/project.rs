use super::conditions::resolve_path;
use super::merge::merge_crew_data;
use crate::constants::{states, DEFAULT_WORKFLOW};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Initial state of a project that has not entered its workflow yet
pub const START_STATE: &str = "START";

/// The mutable project record a workflow run drives.
///
/// `id`, `workflow` and `state` are owned by the engine; everything else is
/// free-form data merged in by crews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub id: String,
    #[serde(default = "default_workflow")]
    pub workflow: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn default_workflow() -> String {
    DEFAULT_WORKFLOW.to_string()
}

fn default_state() -> String {
    START_STATE.to_string()
}

impl ProjectState {
    pub fn new(id: impl Into<String>, idea: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("idea".to_string(), Value::String(idea.into()));
        Self {
            id: id.into(),
            workflow: default_workflow(),
            state: default_state(),
            fields,
        }
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = workflow.into();
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn idea(&self) -> Option<&str> {
        self.fields.get("idea").and_then(Value::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        states::is_terminal(&self.state)
    }

    /// Whole record as one JSON object, engine-owned keys included
    pub fn to_value(&self) -> Value {
        let mut record = self.fields.clone();
        record.insert("id".to_string(), Value::String(self.id.clone()));
        record.insert("workflow".to_string(), Value::String(self.workflow.clone()));
        record.insert("state".to_string(), Value::String(self.state.clone()));
        Value::Object(record)
    }

    /// Dotted-path lookup over [`to_value`](Self::to_value)
    pub fn get(&self, path: &str) -> Option<Value> {
        resolve_path(&self.to_value(), path).cloned()
    }

    /// Deep-merge crew data; returns reserved keys that were ignored
    pub fn merge(&mut self, data: &Map<String, Value>) -> Vec<String> {
        merge_crew_data(&mut self.fields, data)
    }
}
