//! # Workflow Engine
//!
//! Drives one project at a time through its workflow, one tick per state.
//!
//! ## Tick
//!
//! 1. Stop if the project is terminal; force `ERROR` once the transition cap
//!    is reached.
//! 2. Resolve the step owning the current state.
//! 3. Evaluate its guard conditions. Unmet guards escalate to the step's
//!    `on_fail` workflow when one is declared, otherwise the step is skipped.
//! 4. Dispatch: one crew for a plain step, all crews concurrently for a
//!    parallel group, repeated invocations for a loop. Every invocation is
//!    bounded by `crew_timeout` and shielded from panics.
//! 5. Success merges crew data into the record and advances to the next
//!    state (or the crew's `next_state`). A crew `error` escalates or fails
//!    the project; timeouts, panics and crew errors fail it.
//! 6. Record the transition, check for livelock, persist through the
//!    attached [`ProjectRegistry`], publish events and metrics. A registry
//!    that cannot save the new state or log an escalation fails the project
//!    instead of aborting the tick.
//!
//! A failed project lands in `ERROR` and the registry is asked to roll back
//! to the last persisted good state; `ERROR` itself is never persisted.

use super::conditions::evaluate_all;
use super::errors::{WorkflowError, WorkflowResult};
use super::livelock::{LivelockConfig, LivelockDetector};
use super::project::{ProjectState, START_STATE};
use super::workflow::{EscalationPolicy, LoopStep, ParallelStep, StateStep, StepDefinition, WorkflowCatalog};
use crate::constants::{events, states, DEFAULT_CREW_TIMEOUT_SECONDS, DEFAULT_MAX_TRANSITIONS};
use crate::crews::{CrewContext, CrewOutput, CrewStatus};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::logging::{log_crew_dispatch, log_workflow_transition};
use crate::metrics::{MetricsRecorder, NoopMetrics};
use crate::orchestration::task_executor::panic_message;
use crate::registry::{CrewRegistry, EscalationRecord, ProjectRegistry};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEngineConfig {
    /// Hard cap on transitions per run
    pub max_transitions: usize,
    /// Deadline for each crew invocation
    pub crew_timeout: Duration,
    pub livelock: LivelockConfig,
    /// Transitions retained in a run's history
    pub history_limit: usize,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            crew_timeout: Duration::from_secs(DEFAULT_CREW_TIMEOUT_SECONDS),
            livelock: LivelockConfig::default(),
            history_limit: 100,
        }
    }
}

impl WorkflowEngineConfig {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.max_transitions == 0 {
            return Err(WorkflowError::Configuration(
                "max_transitions must be at least 1".into(),
            ));
        }
        if self.crew_timeout.is_zero() {
            return Err(WorkflowError::Configuration(
                "crew_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Crews succeeded; moved to the next declared state
    Advanced,
    /// Guards unmet or crews skipped; moved on without merging
    Skipped,
    /// A crew chose the next state
    Jumped,
    /// Switched to the step's escalation workflow
    Escalated,
    Failed,
    TransitionCap,
    Livelock,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionKind::Advanced => "advanced",
            TransitionKind::Skipped => "skipped",
            TransitionKind::Jumped => "jumped",
            TransitionKind::Escalated => "escalated",
            TransitionKind::Failed => "failed",
            TransitionKind::TransitionCap => "transition_cap",
            TransitionKind::Livelock => "livelock",
        };
        write!(f, "{name}")
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from_state: String,
    pub to_state: String,
    pub workflow: String,
    pub kind: TransitionKind,
    /// Crews dispatched during this tick, in order
    pub crews: Vec<String>,
    pub message: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A project in flight plus the bookkeeping of its run
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    run_id: String,
    project: ProjectState,
    transitions: usize,
    detector: LivelockDetector,
    history: VecDeque<Transition>,
    started_at: DateTime<Utc>,
}

impl WorkflowRun {
    fn new(project: ProjectState, livelock: LivelockConfig) -> Self {
        let mut detector = LivelockDetector::new(livelock);
        detector.record(&project.state);
        Self {
            run_id: Uuid::new_v4().to_string(),
            project,
            transitions: 0,
            detector,
            history: VecDeque::new(),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn project(&self) -> &ProjectState {
        &self.project
    }

    pub fn into_project(self) -> ProjectState {
        self.project
    }

    pub fn transitions(&self) -> usize {
        self.transitions
    }

    pub fn history(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    pub fn is_finished(&self) -> bool {
        self.project.is_terminal()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub run_id: String,
    pub project_id: String,
    pub workflow: String,
    pub current_state: String,
    pub transitions: usize,
    pub max_transitions: usize,
    pub finished: bool,
    pub state_history: Vec<String>,
    pub recent_transitions: Vec<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub description: Option<String>,
    pub initial_state: Option<String>,
    pub states: Vec<String>,
    pub crews: Vec<String>,
    pub step_count: usize,
}

/// What one dispatch produced
enum Dispatch {
    Succeeded { next_state: Option<String> },
    Skipped { message: String },
    /// A crew reported `status: error`
    Rejected { message: String },
    /// Timeout, panic or crew error
    Crashed { message: String },
}

pub struct WorkflowEngine {
    catalog: Arc<WorkflowCatalog>,
    crews: Arc<CrewRegistry>,
    config: WorkflowEngineConfig,
    registry: Option<Arc<dyn ProjectRegistry>>,
    events: Option<EventPublisher>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl WorkflowEngine {
    /// Build an engine; every crew named by the catalog must be registered
    pub fn new(
        catalog: Arc<WorkflowCatalog>,
        crews: Arc<CrewRegistry>,
        config: WorkflowEngineConfig,
    ) -> WorkflowResult<Self> {
        config.validate()?;
        for (name, definition) in catalog.iter() {
            for step in &definition.sequence {
                for crew in step.crews() {
                    if !crews.contains(crew) {
                        return Err(WorkflowError::MissingCrew {
                            workflow: name.clone(),
                            state: step.entry_state().to_string(),
                            crew: crew.to_string(),
                        });
                    }
                }
            }
        }
        info!(
            workflows = ?catalog.names(),
            crews = crews.len(),
            max_transitions = config.max_transitions,
            "🚀 Workflow engine initialized"
        );
        Ok(Self {
            catalog,
            crews,
            config,
            registry: None,
            events: None,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_registry(mut self, registry: Arc<dyn ProjectRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &WorkflowEngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    pub fn list_workflows(&self) -> Vec<String> {
        self.catalog.names()
    }

    pub fn workflow_info(&self, name: &str) -> Option<WorkflowInfo> {
        let definition = self.catalog.get(name)?;
        let mut states = Vec::new();
        let mut crews = Vec::new();
        for step in &definition.sequence {
            match step {
                StepDefinition::Parallel(group) => {
                    states.extend(group.parallel.iter().map(|s| s.state.clone()))
                }
                other => states.push(other.entry_state().to_string()),
            }
            for crew in step.crews() {
                if !crews.iter().any(|c| c == crew) {
                    crews.push(crew.to_string());
                }
            }
        }
        Some(WorkflowInfo {
            name: name.to_string(),
            description: definition.description().map(str::to_string),
            initial_state: definition.initial_state().map(str::to_string),
            states,
            crews,
            step_count: definition.sequence.len(),
        })
    }

    /// Prepare a run; a project at `START` enters its workflow's first state
    pub async fn start(&self, mut project: ProjectState) -> Result<WorkflowRun> {
        let definition = self
            .catalog
            .get(&project.workflow)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(project.workflow.clone()))?;
        if project.state.is_empty() || project.state == START_STATE {
            if let Some(initial) = definition.initial_state() {
                project.state = initial.to_string();
            }
        }
        let run = WorkflowRun::new(project, self.config.livelock.clone());
        info!(
            run_id = %run.run_id,
            project_id = %run.project.id,
            workflow = %run.project.workflow,
            state = %run.project.state,
            "▶️ Workflow run started"
        );
        self.save(&run).await?;
        Ok(run)
    }

    /// Start and tick until the project is terminal
    pub async fn run(&self, project: ProjectState) -> Result<WorkflowRun> {
        let mut run = self.start(project).await?;
        while self.tick(&mut run).await?.is_some() {}
        Ok(run)
    }

    /// Advance the project by one state; `None` once it is terminal
    pub async fn tick(&self, run: &mut WorkflowRun) -> Result<Option<Transition>> {
        if run.project.is_terminal() {
            return Ok(None);
        }
        let started = Instant::now();
        let from = run.project.state.clone();

        if run.transitions >= self.config.max_transitions {
            let message = format!(
                "transition cap of {} reached",
                self.config.max_transitions
            );
            return self
                .fail(run, from, TransitionKind::TransitionCap, Vec::new(), message, started)
                .await
                .map(Some);
        }

        let catalog = Arc::clone(&self.catalog);
        let Some(definition) = catalog.get(&run.project.workflow) else {
            let message = format!("workflow '{}' is not defined", run.project.workflow);
            return self
                .fail(run, from, TransitionKind::Failed, Vec::new(), message, started)
                .await
                .map(Some);
        };
        let Some(index) = definition.step_index(&from) else {
            let message = format!(
                "state '{from}' is not part of workflow '{}'",
                run.project.workflow
            );
            return self
                .fail(run, from, TransitionKind::Failed, Vec::new(), message, started)
                .await
                .map(Some);
        };
        let step = &definition.sequence[index];

        if !evaluate_all(step.conditions(), &run.project.to_value()) {
            if let Some(policy) = step.on_fail() {
                return self
                    .escalate(run, from, policy, Vec::new(), "condition_failure".into(), started)
                    .await
                    .map(Some);
            }
            let to = definition.state_after(index).to_string();
            debug!(project_id = %run.project.id, state = %from, "Guard conditions not met, skipping step");
            return self
                .advance(
                    run,
                    from,
                    to,
                    TransitionKind::Skipped,
                    Vec::new(),
                    Some("guard conditions not met".into()),
                    started,
                )
                .await
                .map(Some);
        }

        let mut crews = Vec::new();
        let dispatch = match step {
            StepDefinition::State(step) => self.dispatch_state(run, step, &mut crews).await,
            StepDefinition::Parallel(group) => self.dispatch_parallel(run, group, &mut crews).await,
            StepDefinition::Loop(step) => self.dispatch_loop(run, step, &mut crews).await,
        };

        let transition = match dispatch {
            Dispatch::Succeeded { next_state: Some(target) } => {
                if definition.accepts_state(&target) {
                    self.advance(run, from, target, TransitionKind::Jumped, crews, None, started)
                        .await?
                } else {
                    let message = format!("crew requested unknown state '{target}'");
                    self.fail(run, from, TransitionKind::Failed, crews, message, started)
                        .await?
                }
            }
            Dispatch::Succeeded { next_state: None } => {
                let to = definition.state_after(index).to_string();
                self.advance(run, from, to, TransitionKind::Advanced, crews, None, started)
                    .await?
            }
            Dispatch::Skipped { message } => {
                let to = definition.state_after(index).to_string();
                self.advance(run, from, to, TransitionKind::Skipped, crews, Some(message), started)
                    .await?
            }
            Dispatch::Rejected { message } => {
                self.publish(
                    events::CREW_FAILED,
                    json!({"project_id": run.project.id, "state": from, "error": message, "business_failure": true}),
                )
                .await;
                match step.on_fail() {
                    Some(policy) => {
                        self.escalate(run, from, policy, crews, message, started)
                            .await?
                    }
                    None => {
                        self.fail(run, from, TransitionKind::Failed, crews, message, started)
                            .await?
                    }
                }
            }
            Dispatch::Crashed { message } => {
                self.publish(
                    events::CREW_FAILED,
                    json!({"project_id": run.project.id, "state": from, "error": message, "business_failure": false}),
                )
                .await;
                self.fail(run, from, TransitionKind::Failed, crews, message, started)
                    .await?
            }
        };
        Ok(Some(transition))
    }

    pub fn execution_summary(&self, run: &WorkflowRun) -> ExecutionSummary {
        let recent = run.history.len().saturating_sub(10);
        ExecutionSummary {
            run_id: run.run_id.clone(),
            project_id: run.project.id.clone(),
            workflow: run.project.workflow.clone(),
            current_state: run.project.state.clone(),
            transitions: run.transitions,
            max_transitions: self.config.max_transitions,
            finished: run.is_finished(),
            state_history: run.detector.history().map(str::to_string).collect(),
            recent_transitions: run.history.iter().skip(recent).cloned().collect(),
        }
    }

    async fn dispatch_state(&self, run: &mut WorkflowRun, step: &StateStep, crews: &mut Vec<String>) -> Dispatch {
        let Some(crew) = step.crew.as_deref() else {
            return Dispatch::Skipped {
                message: format!("state '{}' has no crew", step.state),
            };
        };
        crews.push(crew.to_string());
        let context = crew_context(&run.project, &step.state, None);
        match self.invoke(crew, context).await {
            Err(message) => Dispatch::Crashed { message },
            Ok(output) => self.apply_output(run, crew, output),
        }
    }

    async fn dispatch_parallel(
        &self,
        run: &mut WorkflowRun,
        group: &ParallelStep,
        crews: &mut Vec<String>,
    ) -> Dispatch {
        let record = run.project.to_value();
        let mut invocations = Vec::new();
        for sub in &group.parallel {
            let Some(crew) = sub.crew.as_deref() else {
                continue;
            };
            if !evaluate_all(&sub.conditions, &record) {
                debug!(project_id = %run.project.id, state = %sub.state, "Parallel branch guard not met, skipping");
                continue;
            }
            crews.push(crew.to_string());
            let context = crew_context(&run.project, &sub.state, None);
            invocations.push(async move { (crew, self.invoke(crew, context).await) });
        }
        if invocations.is_empty() {
            return Dispatch::Skipped {
                message: "no parallel branch was eligible".into(),
            };
        }

        let results = futures::future::join_all(invocations).await;
        let mut outputs = Vec::with_capacity(results.len());
        for (crew, result) in results {
            match result {
                Err(message) => return Dispatch::Crashed { message },
                Ok(output) if output.status == CrewStatus::Error => {
                    return Dispatch::Rejected {
                        message: rejection_message(crew, &output),
                    }
                }
                Ok(output) => outputs.push((crew, output)),
            }
        }

        let mut next_state = None;
        let mut any_success = false;
        for (crew, output) in outputs {
            if let Dispatch::Succeeded { next_state: jump } = self.apply_output(run, crew, output) {
                any_success = true;
                next_state = jump.or(next_state);
            }
        }
        if any_success {
            Dispatch::Succeeded { next_state }
        } else {
            Dispatch::Skipped {
                message: "every parallel crew skipped".into(),
            }
        }
    }

    async fn dispatch_loop(&self, run: &mut WorkflowRun, step: &LoopStep, crews: &mut Vec<String>) -> Dispatch {
        let crew = step.spec.crew.as_str();
        let mut ran = false;
        for iteration in 1..=step.spec.max_iterations {
            if !step.spec.break_conditions.is_empty()
                && evaluate_all(&step.spec.break_conditions, &run.project.to_value())
            {
                debug!(project_id = %run.project.id, iteration, "Loop break conditions hold");
                break;
            }
            crews.push(crew.to_string());
            let state = step.iteration_state(iteration);
            let context = crew_context(&run.project, &state, Some(iteration));
            let output = match self.invoke(crew, context).await {
                Err(message) => return Dispatch::Crashed { message },
                Ok(output) => output,
            };
            match self.apply_output(run, crew, output) {
                Dispatch::Succeeded { next_state: Some(target) } => {
                    return Dispatch::Succeeded {
                        next_state: Some(target),
                    }
                }
                Dispatch::Succeeded { next_state: None } => ran = true,
                Dispatch::Skipped { .. } => {}
                other => return other,
            }
        }
        if ran {
            Dispatch::Succeeded { next_state: None }
        } else {
            Dispatch::Skipped {
                message: format!("loop '{}' ran no successful iteration", step.spec.state_prefix),
            }
        }
    }

    fn apply_output(&self, run: &mut WorkflowRun, crew: &str, output: CrewOutput) -> Dispatch {
        match output.status {
            CrewStatus::Error => Dispatch::Rejected {
                message: rejection_message(crew, &output),
            },
            CrewStatus::Skipped => Dispatch::Skipped {
                message: output
                    .message
                    .unwrap_or_else(|| format!("crew '{crew}' skipped")),
            },
            CrewStatus::Success => {
                let ignored = run.project.merge(&output.data);
                if !ignored.is_empty() {
                    warn!(crew = %crew, keys = ?ignored, "Crew tried to overwrite engine-owned fields");
                }
                Dispatch::Succeeded {
                    next_state: output.next_state,
                }
            }
        }
    }

    /// Run one crew with timeout and panic isolation; `Err` carries the reason
    async fn invoke(&self, crew_name: &str, context: CrewContext) -> std::result::Result<CrewOutput, String> {
        let project_id = context.project_id.clone();
        let state = context.state.clone();
        let Some(crew) = self.crews.create(crew_name) else {
            return Err(format!("crew '{crew_name}' is not registered"));
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.crew_timeout,
            AssertUnwindSafe(crew.run(context)).catch_unwind(),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Err(_) => Err(format!(
                "crew '{crew_name}' timed out after {}s",
                self.config.crew_timeout.as_secs_f64()
            )),
            Ok(Err(panic)) => Err(format!(
                "crew '{crew_name}' panicked: {}",
                panic_message(panic.as_ref())
            )),
            Ok(Ok(Err(err))) => Err(format!("crew '{crew_name}' failed: {err}")),
            Ok(Ok(Ok(output))) => Ok(output),
        };

        let status = match &outcome {
            Ok(output) => output.status.to_string(),
            Err(_) => "crashed".to_string(),
        };
        if let Err(reason) = &outcome {
            error!(project_id = %project_id, state = %state, crew = %crew_name, error = %reason, "💥 Crew invocation failed");
        }
        log_crew_dispatch(
            &project_id,
            &state,
            crew_name,
            &status,
            Some(elapsed_ms),
            outcome.as_ref().err().map(String::as_str),
        );
        let labels = [("crew", crew_name), ("status", status.as_str())];
        self.metrics.increment_counter("crew.invocations", 1, &labels);
        self.metrics
            .record_histogram("crew.duration_ms", elapsed_ms as f64, &labels[..1]);
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn advance(
        &self,
        run: &mut WorkflowRun,
        from: String,
        to: String,
        kind: TransitionKind,
        crews: Vec<String>,
        message: Option<String>,
        started: Instant,
    ) -> Result<Transition> {
        run.project.state = to.clone();
        run.transitions += 1;

        if let Some(livelock) = run.detector.record(&to) {
            let message = format!("livelock detected: {livelock}");
            warn!(project_id = %run.project.id, state = %to, livelock = %livelock, "🔁 Livelock detected, forcing ERROR");
            run.project.state = states::ERROR.to_string();
            run.project
                .fields
                .insert("error".to_string(), Value::String(message.clone()));
            self.rollback(run).await;
            return Ok(self
                .record(run, from, TransitionKind::Livelock, crews, Some(message), started)
                .await);
        }

        if let Err(err) = self.save(run).await {
            // fail() counts the transition itself
            run.transitions -= 1;
            let message = format!("state '{to}' could not be persisted: {err}");
            return self
                .fail(run, from, TransitionKind::Failed, crews, message, started)
                .await;
        }
        Ok(self.record(run, from, kind, crews, message, started).await)
    }

    async fn fail(
        &self,
        run: &mut WorkflowRun,
        from: String,
        kind: TransitionKind,
        crews: Vec<String>,
        message: String,
        started: Instant,
    ) -> Result<Transition> {
        error!(
            project_id = %run.project.id,
            workflow = %run.project.workflow,
            state = %from,
            error = %message,
            "❌ Workflow step failed, entering ERROR"
        );
        run.project.state = states::ERROR.to_string();
        run.project
            .fields
            .insert("error".to_string(), Value::String(message.clone()));
        if kind != TransitionKind::TransitionCap {
            run.transitions += 1;
        }
        run.detector.record(states::ERROR);
        self.rollback(run).await;
        Ok(self.record(run, from, kind, crews, Some(message), started).await)
    }

    async fn escalate(
        &self,
        run: &mut WorkflowRun,
        from: String,
        policy: &EscalationPolicy,
        crews: Vec<String>,
        reason: String,
        started: Instant,
    ) -> Result<Transition> {
        let Some(target) = self
            .catalog
            .get(&policy.escalate_to)
            .and_then(|definition| definition.initial_state())
        else {
            let message = format!("escalation target '{}' is not defined", policy.escalate_to);
            return self
                .fail(run, from, TransitionKind::Failed, crews, message, started)
                .await;
        };
        let target = target.to_string();
        if let Some(registry) = &self.registry {
            let logged = registry
                .log_escalation(EscalationRecord::new(
                    run.project.id.clone(),
                    run.project.workflow.clone(),
                    policy.escalate_to.clone(),
                    reason.clone(),
                ))
                .await;
            if let Err(err) = logged {
                let message = format!(
                    "escalation to '{}' could not be logged: {err}",
                    policy.escalate_to
                );
                return self
                    .fail(run, from, TransitionKind::Failed, crews, message, started)
                    .await;
            }
        }
        let from_workflow = std::mem::replace(&mut run.project.workflow, policy.escalate_to.clone());
        info!(
            project_id = %run.project.id,
            from_workflow = %from_workflow,
            to_workflow = %policy.escalate_to,
            reason = %reason,
            "⤴️ Escalating workflow"
        );

        self.publish(
            events::WORKFLOW_ESCALATED,
            json!({
                "project_id": run.project.id,
                "from_workflow": from_workflow,
                "to_workflow": policy.escalate_to,
                "reason": reason,
            }),
        )
        .await;

        self.advance(run, from, target, TransitionKind::Escalated, crews, Some(reason), started)
            .await
    }

    async fn record(
        &self,
        run: &mut WorkflowRun,
        from: String,
        kind: TransitionKind,
        crews: Vec<String>,
        message: Option<String>,
        started: Instant,
    ) -> Transition {
        let duration_ms = started.elapsed().as_millis() as u64;
        let transition = Transition {
            from_state: from,
            to_state: run.project.state.clone(),
            workflow: run.project.workflow.clone(),
            kind,
            crews,
            message,
            duration_ms,
            timestamp: Utc::now(),
        };

        log_workflow_transition(
            &run.project.id,
            &transition.workflow,
            &transition.from_state,
            &transition.to_state,
            transition.message.as_deref(),
        );
        let kind_label = kind.to_string();
        self.metrics
            .increment_counter("workflow.transitions", 1, &[("kind", kind_label.as_str())]);
        self.metrics.record_histogram(
            "workflow.step.duration_ms",
            duration_ms as f64,
            &[("state", transition.from_state.as_str())],
        );
        self.publish(
            events::WORKFLOW_TRANSITION,
            json!({
                "run_id": run.run_id,
                "project_id": run.project.id,
                "from_state": transition.from_state,
                "to_state": transition.to_state,
                "kind": kind,
            }),
        )
        .await;

        if run.project.is_terminal() {
            info!(
                run_id = %run.run_id,
                project_id = %run.project.id,
                state = %run.project.state,
                transitions = run.transitions,
                "🏁 Workflow run finished"
            );
            self.metrics.increment_counter(
                "workflow.finished",
                1,
                &[("state", run.project.state.as_str())],
            );
            self.publish(
                events::WORKFLOW_FINISHED,
                json!({
                    "run_id": run.run_id,
                    "project_id": run.project.id,
                    "state": run.project.state,
                    "transitions": run.transitions,
                }),
            )
            .await;
        }

        if self.config.history_limit > 0 {
            if run.history.len() == self.config.history_limit {
                run.history.pop_front();
            }
            run.history.push_back(transition.clone());
        }
        transition
    }

    async fn save(&self, run: &WorkflowRun) -> Result<()> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        if matches!(run.project.state.as_str(), states::ERROR | states::FAILED) {
            return Ok(());
        }
        registry.save_project_state(&run.project).await
    }

    async fn rollback(&self, run: &WorkflowRun) {
        let Some(registry) = &self.registry else {
            return;
        };
        match registry.rollback_state(&run.project.id).await {
            Ok(Some(previous)) => debug!(
                project_id = %run.project.id,
                restored_state = %previous.state,
                "Persisted record kept at last good state"
            ),
            Ok(None) => {}
            Err(err) => warn!(project_id = %run.project.id, error = %err, "Rollback failed"),
        }
    }

    async fn publish(&self, name: &str, context: Value) {
        if let Some(events) = &self.events {
            if let Err(err) = events.publish(name, context).await {
                debug!(event = %name, error = %err, "Event publish failed");
            }
        }
    }
}

fn crew_context(project: &ProjectState, state: &str, iteration: Option<u32>) -> CrewContext {
    CrewContext {
        project_id: project.id.clone(),
        workflow: project.workflow.clone(),
        state: state.to_string(),
        iteration,
        record: project.to_value(),
    }
}

fn rejection_message(crew: &str, output: &CrewOutput) -> String {
    match &output.message {
        Some(message) => format!("crew '{crew}' reported an error: {message}"),
        None => format!("crew '{crew}' reported an error"),
    }
}
