//! # Workflow Definitions
//!
//! A workflow is a named, ordered sequence of steps. Each step is one of:
//!
//! - a plain state `{state, crew, conditions?, on_fail?}`, or a terminal
//!   `{state: COMPLETED|ERROR|FAILED}` without a crew
//! - a parallel group `{parallel: [plain step, ...]}` whose crews run
//!   concurrently and are joined before the project advances
//! - a bounded loop `{loop: {state_prefix, crew, max_iterations, break_conditions}}`
//!
//! Definitions are YAML keyed by workflow name and are validated when
//! loaded, so a catalog that exists is structurally sound.
//!
//! ```yaml
//! default_software_build:
//!   metadata:
//!     description: Default software build workflow
//!   sequence:
//!     - { state: IDEA_VALIDATION, crew: ValidatorCrew }
//!     - state: TASK_EXECUTION
//!       crew: BuilderCrew
//!       conditions:
//!         - { field: validation.approved, value: true }
//!       on_fail: { escalate_to: rapid_prototype }
//!     - { state: FEEDBACK_COLLECTION, crew: FeedbackCrew }
//! ```

use super::conditions::Condition;
use super::errors::{WorkflowError, WorkflowResult};
use crate::constants::{states, DEFAULT_WORKFLOW};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub escalate_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateStep {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<EscalationPolicy>,
}

impl StateStep {
    pub fn new(state: impl Into<String>, crew: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            crew: Some(crew.into()),
            conditions: Vec::new(),
            on_fail: None,
        }
    }

    pub fn terminal(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            crew: None,
            conditions: Vec::new(),
            on_fail: None,
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn escalating_to(mut self, workflow: impl Into<String>) -> Self {
        self.on_fail = Some(EscalationPolicy {
            escalate_to: workflow.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStep {
    pub parallel: Vec<StateStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<EscalationPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub state_prefix: String,
    pub crew: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Checked before every iteration; the loop ends once they all hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub break_conditions: Vec<Condition>,
}

fn default_max_iterations() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStep {
    #[serde(rename = "loop")]
    pub spec: LoopSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<EscalationPolicy>,
}

impl LoopStep {
    /// State name of the `n`th iteration, 1-based
    pub fn iteration_state(&self, n: u32) -> String {
        format!("{}_{n}", self.spec.state_prefix)
    }

    pub fn owns_state(&self, state: &str) -> bool {
        let prefix = &self.spec.state_prefix;
        state == prefix
            || state
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|n| n.parse::<u32>().is_ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDefinition {
    Parallel(ParallelStep),
    Loop(LoopStep),
    State(StateStep),
}

impl StepDefinition {
    /// State a project occupies when this step is next to run
    pub fn entry_state(&self) -> &str {
        match self {
            StepDefinition::State(step) => &step.state,
            StepDefinition::Parallel(step) => step
                .parallel
                .first()
                .map(|s| s.state.as_str())
                .unwrap_or_default(),
            StepDefinition::Loop(step) => &step.spec.state_prefix,
        }
    }

    pub fn owns_state(&self, state: &str) -> bool {
        match self {
            StepDefinition::State(step) => step.state == state,
            StepDefinition::Parallel(step) => step.parallel.iter().any(|s| s.state == state),
            StepDefinition::Loop(step) => step.owns_state(state),
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        match self {
            StepDefinition::State(step) => &step.conditions,
            StepDefinition::Parallel(step) => &step.conditions,
            StepDefinition::Loop(step) => &step.conditions,
        }
    }

    pub fn on_fail(&self) -> Option<&EscalationPolicy> {
        match self {
            StepDefinition::State(step) => step.on_fail.as_ref(),
            StepDefinition::Parallel(step) => step.on_fail.as_ref(),
            StepDefinition::Loop(step) => step.on_fail.as_ref(),
        }
    }

    /// Crew names this step dispatches to
    pub fn crews(&self) -> Vec<&str> {
        match self {
            StepDefinition::State(step) => step.crew.iter().map(String::as_str).collect(),
            StepDefinition::Parallel(step) => step
                .parallel
                .iter()
                .filter_map(|s| s.crew.as_deref())
                .collect(),
            StepDefinition::Loop(step) => vec![step.spec.crew.as_str()],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepDefinition::State(step) if states::is_terminal(&step.state))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub sequence: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(sequence: Vec<StepDefinition>) -> Self {
        Self {
            metadata: BTreeMap::new(),
            sequence,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata.get("description").and_then(Value::as_str)
    }

    /// Entry state of the first step
    pub fn initial_state(&self) -> Option<&str> {
        self.sequence.first().map(StepDefinition::entry_state)
    }

    /// Index of the step that owns `state`
    pub fn step_index(&self, state: &str) -> Option<usize> {
        self.sequence.iter().position(|step| step.owns_state(state))
    }

    /// State to enter after the step at `index`; `COMPLETED` past the end
    pub fn state_after(&self, index: usize) -> &str {
        self.sequence
            .get(index + 1)
            .map(StepDefinition::entry_state)
            .unwrap_or(states::COMPLETED)
    }

    /// States a crew may jump to with `next_state`
    pub fn accepts_state(&self, state: &str) -> bool {
        states::is_terminal(state) || self.step_index(state).is_some()
    }

    fn validate(&self, name: &str) -> WorkflowResult<()> {
        if self.sequence.is_empty() {
            return Err(WorkflowError::invalid(name, "sequence must not be empty"));
        }
        let mut seen = HashSet::new();
        let mut claim = |state: &str| -> WorkflowResult<()> {
            if state.trim().is_empty() {
                return Err(WorkflowError::invalid(name, "state names must not be empty"));
            }
            if !seen.insert(state.to_string()) {
                return Err(WorkflowError::invalid(
                    name,
                    format!("state '{state}' appears more than once"),
                ));
            }
            Ok(())
        };

        for step in &self.sequence {
            match step {
                StepDefinition::State(step) => {
                    claim(&step.state)?;
                    let terminal = states::is_terminal(&step.state);
                    match (&step.crew, terminal) {
                        (None, false) => {
                            return Err(WorkflowError::invalid(
                                name,
                                format!("state '{}' has no crew", step.state),
                            ))
                        }
                        (Some(crew), true) => {
                            return Err(WorkflowError::invalid(
                                name,
                                format!("terminal state '{}' cannot dispatch crew '{crew}'", step.state),
                            ))
                        }
                        _ => {}
                    }
                }
                StepDefinition::Parallel(group) => {
                    if group.parallel.is_empty() {
                        return Err(WorkflowError::invalid(name, "parallel group must not be empty"));
                    }
                    for sub in &group.parallel {
                        claim(&sub.state)?;
                        if states::is_terminal(&sub.state) || sub.crew.is_none() {
                            return Err(WorkflowError::invalid(
                                name,
                                format!("parallel state '{}' needs a crew and cannot be terminal", sub.state),
                            ));
                        }
                    }
                }
                StepDefinition::Loop(step) => {
                    claim(&step.spec.state_prefix)?;
                    if step.spec.max_iterations == 0 {
                        return Err(WorkflowError::invalid(
                            name,
                            format!("loop '{}' needs max_iterations >= 1", step.spec.state_prefix),
                        ));
                    }
                    if step.spec.crew.trim().is_empty() {
                        return Err(WorkflowError::invalid(
                            name,
                            format!("loop '{}' has no crew", step.spec.state_prefix),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Validated set of named workflows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowCatalog {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn new(workflows: BTreeMap<String, WorkflowDefinition>) -> WorkflowResult<Self> {
        let catalog = Self { workflows };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(yaml: &str) -> WorkflowResult<Self> {
        let workflows: BTreeMap<String, WorkflowDefinition> = serde_yaml::from_str(yaml)?;
        Self::new(workflows)
    }

    pub fn from_path(path: impl AsRef<Path>) -> WorkflowResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_yaml_str(&yaml)?;
        info!(
            path = %path.display(),
            workflows = ?catalog.names(),
            "📜 Loaded workflow catalog"
        );
        Ok(catalog)
    }

    /// The fallback catalog used when no definitions file is configured
    pub fn builtin() -> Self {
        let sequence = vec![
            StepDefinition::State(StateStep::new("IDEA_VALIDATION", "ValidatorCrew")),
            StepDefinition::State(StateStep::new("TASK_EXECUTION", "BuilderCrew")),
            StepDefinition::State(StateStep::new("FEEDBACK_COLLECTION", "FeedbackCrew")),
        ];
        let mut definition = WorkflowDefinition::new(sequence);
        definition.metadata.insert(
            "description".to_string(),
            Value::String("Default software build workflow".to_string()),
        );
        Self {
            workflows: BTreeMap::from([(DEFAULT_WORKFLOW.to_string(), definition)]),
        }
    }

    /// Add or replace one workflow, revalidating the catalog
    pub fn insert(&mut self, name: impl Into<String>, definition: WorkflowDefinition) -> WorkflowResult<()> {
        let name = name.into();
        let previous = self.workflows.insert(name.clone(), definition);
        if let Err(err) = self.validate() {
            match previous {
                Some(previous) => self.workflows.insert(name, previous),
                None => self.workflows.remove(&name),
            };
            return Err(err);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WorkflowDefinition)> {
        self.workflows.iter()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    fn validate(&self) -> WorkflowResult<()> {
        for (name, definition) in &self.workflows {
            definition.validate(name)?;
            for step in &definition.sequence {
                if let Some(policy) = step.on_fail() {
                    if !self.workflows.contains_key(&policy.escalate_to) {
                        return Err(WorkflowError::invalid(
                            name,
                            format!("escalation target '{}' is not defined", policy.escalate_to),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
