//! # Task Executor
//!
//! Drives a [`DependencyGraph`] of work items to completion under concurrency,
//! resource and reliability constraints.
//!
//! ## Overview
//!
//! 1. Build the graph from the submitted items. Explicit dependencies are
//!    structural: unknown ids or cycles fail the whole run up front. Items that
//!    declare no dependencies get best-effort inferred ones; inferred edges that
//!    would close a cycle are skipped with a warning.
//! 2. Fill in estimated resources and decomposed steps where the item declares
//!    none.
//! 3. Repeatedly schedule ready items, at most `max_concurrent_tasks` at a
//!    time. Each running item reserves its resources, then runs its steps in
//!    order, each step guarded by circuit breaker → retry manager → timeout.
//! 4. Every `checkpoint_interval` completed steps a [`Checkpoint`] is recorded
//!    (and persisted when a [`PersistenceManager`] is attached). A failed step
//!    rolls the item back to its latest checkpoint while its retry budget
//!    lasts; afterwards the item is FAILED and every transitive dependent is
//!    BLOCKED. Siblings keep running.
//! 5. When nothing is ready and nothing is running the run ends with an
//!    [`ExecutionReport`]. Items that never became ready are listed as
//!    unreachable.
//!
//! A work item is attempted at most `failure_retry_limit + 1` times. The
//! scheduler grabs an item's resources before spawning it; when the pools are
//! busy and other items are still running, the item simply waits for a later
//! round. Only a reservation that fails with nothing else in flight counts as
//! a failed attempt, puts the item back to PENDING after a backoff delay while
//! budget remains, and fails it afterwards.

use super::analysis::{decompose_steps, estimate_resources, infer_dependencies};
use super::dependency_graph::{DependencyGraph, GraphValidation};
use super::errors::{OrchestrationError, OrchestrationResult, StepError};
use super::monitoring::{ExecutionCounts, MonitoringReport};
use super::resource_manager::{ResourceManager, ResourceUtilization};
use super::step_runner::{SimulatedStepRunner, StepRunner};
use super::work_item::{Checkpoint, WorkItem, WorkItemStatus};
use crate::constants::{events, DEFAULT_CHECKPOINT_HISTORY};
use crate::events::EventPublisher;
use crate::logging::log_work_item_operation;
use crate::metrics::{MetricsRecorder, NoopMetrics};
use crate::persistence::PersistenceManager;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, ErrorCategory, RetryConfig,
    RetryManager, Retryable,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runtime settings for one [`TaskExecutor`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub max_concurrent_tasks: usize,
    /// Completed steps between checkpoints
    pub checkpoint_interval: usize,
    /// Item-level retries after the first attempt
    pub failure_retry_limit: u32,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Deadline for a single step invocation
    pub step_timeout: Duration,
    pub reservation_timeout: Duration,
    /// Infer dependencies from descriptions for items that declare none
    pub infer_dependencies: bool,
    pub checkpoint_history: usize,
    /// Per-step retry policy applied inside the circuit breaker
    pub step_retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            checkpoint_interval: 5,
            failure_retry_limit: 3,
            circuit_breaker: CircuitBreakerConfig::new(5, Duration::from_secs(60)),
            step_timeout: Duration::from_secs(3600),
            reservation_timeout: Duration::from_secs(5),
            infer_dependencies: true,
            checkpoint_history: DEFAULT_CHECKPOINT_HISTORY,
            step_retry: RetryConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> OrchestrationResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(OrchestrationError::Configuration(
                "max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(OrchestrationError::Configuration(
                "checkpoint_interval must be at least 1".into(),
            ));
        }
        if self.checkpoint_history == 0 {
            return Err(OrchestrationError::Configuration(
                "checkpoint_history must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Overall outcome of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::PartialSuccess => write!(f, "partial_success"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemResult {
    pub status: WorkItemStatus,
    pub attempts: u32,
    pub output: Option<Value>,
    pub checkpoints: usize,
    pub duration_ms: Option<i64>,
    pub error_log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedWorkItem {
    pub id: String,
    pub error: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub unreachable: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub total_retries: u32,
    pub total_checkpoints: usize,
    /// Highest number of work items running at once
    pub peak_concurrency: usize,
    pub average_execution_seconds: f64,
    pub resource_utilization: ResourceUtilization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Order in which work items first started
    pub execution_order: Vec<String>,
    pub completion_order: Vec<String>,
    pub critical_path: Vec<String>,
    pub parallel_groups: Vec<Vec<String>>,
    pub results: BTreeMap<String, WorkItemResult>,
    pub failed: Vec<FailedWorkItem>,
    pub blocked: Vec<String>,
    pub unreachable: Vec<String>,
    pub stats: ExecutionStats,
    pub monitoring: MonitoringReport,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn status_of(&self, id: &str) -> Option<WorkItemStatus> {
        self.results.get(id).map(|result| result.status)
    }
}

enum ItemOutcome {
    Completed { item: WorkItem, output: Value },
    Failed { item: WorkItem, error: String },
    Requeued { item: WorkItem, error: String },
    Panicked { id: String, message: String },
}

/// Shared, per-run state handed to every spawned work item
struct RunContext {
    execution_id: String,
    config: ExecutorConfig,
    runner: Arc<dyn StepRunner>,
    resources: Arc<ResourceManager>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryManager,
    persistence: Option<Arc<PersistenceManager>>,
}

#[derive(Default)]
struct RunLedger {
    started: HashSet<String>,
    execution_order: Vec<String>,
    completion_order: Vec<String>,
    outputs: HashMap<String, Value>,
    failed: Vec<FailedWorkItem>,
    blocked: Vec<String>,
    peak_concurrency: usize,
}

/// Dependency-aware executor for batches of work items
pub struct TaskExecutor {
    config: ExecutorConfig,
    runner: Arc<dyn StepRunner>,
    resources: Arc<ResourceManager>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryManager,
    persistence: Option<Arc<PersistenceManager>>,
    events: Option<EventPublisher>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl TaskExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            "task_executor",
            config.circuit_breaker.clone(),
        ));
        let retry = RetryManager::new(config.step_retry.clone());
        Self {
            config,
            runner: Arc::new(SimulatedStepRunner::default()),
            resources: Arc::new(ResourceManager::default()),
            breaker,
            retry,
            persistence: None,
            events: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_resource_manager(mut self, resources: Arc<ResourceManager>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
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

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn resource_manager(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Execute `items` under a fresh execution id
    pub async fn execute(&self, items: Vec<WorkItem>) -> OrchestrationResult<ExecutionReport> {
        self.execute_with_id(Uuid::new_v4().to_string(), items)
            .await
    }

    pub async fn execute_with_id(
        &self,
        execution_id: impl Into<String>,
        items: Vec<WorkItem>,
    ) -> OrchestrationResult<ExecutionReport> {
        let execution_id = execution_id.into();
        self.config.validate()?;

        let started_at = Utc::now();
        let run_timer = tokio::time::Instant::now();
        let mut warnings = Vec::new();
        let mut graph = self.build_graph(items, &mut warnings)?;
        let critical_path = graph.critical_path();
        let parallel_groups = graph.parallel_groups()?;

        info!(
            execution_id = %execution_id,
            work_items = graph.len(),
            dependencies = graph.edge_count(),
            max_concurrent = self.config.max_concurrent_tasks,
            "🚀 Starting work item execution"
        );

        let context = Arc::new(RunContext {
            execution_id: execution_id.clone(),
            config: self.config.clone(),
            runner: Arc::clone(&self.runner),
            resources: Arc::clone(&self.resources),
            breaker: Arc::clone(&self.breaker),
            retry: self.retry.clone(),
            persistence: self.persistence.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
        let mut running: JoinSet<ItemOutcome> = JoinSet::new();
        let mut ledger = RunLedger::default();

        loop {
            for id in graph.ready_work_items() {
                if semaphore.available_permits() == 0 {
                    break;
                }
                let Some(item) = graph.get_mut(&id) else {
                    continue;
                };
                // Busy pools defer the item to a later round while others still
                // hold resources; only an idle run pays for a waiting reservation.
                let reserved = self.resources.try_reserve(&id, &item.resources);
                if !reserved && !running.is_empty() {
                    debug!(execution_id = %execution_id, work_item_id = %id, "Resources busy, deferring work item");
                    continue;
                }
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    if reserved {
                        self.resources.release(&id);
                    }
                    break;
                };
                item.status = WorkItemStatus::Running;
                item.started_at.get_or_insert_with(Utc::now);
                let item = item.clone();

                if ledger.started.insert(id.clone()) {
                    ledger.execution_order.push(id.clone());
                }
                debug!(execution_id = %execution_id, work_item_id = %id, attempt = item.retry_count + 1, "▶️ Work item started");

                let context = Arc::clone(&context);
                running.spawn(async move {
                    let id = item.id.clone();
                    let outcome = AssertUnwindSafe(context.run_item(item, reserved))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| ItemOutcome::Panicked {
                            id,
                            message: panic_message(panic.as_ref()),
                        });
                    drop(permit);
                    outcome
                });
            }
            // Finished tasks stay in the JoinSet until joined; held permits
            // count only the items still executing.
            let in_flight = self.config.max_concurrent_tasks - semaphore.available_permits();
            ledger.peak_concurrency = ledger.peak_concurrency.max(in_flight);
            self.metrics
                .set_gauge("executor.work_items.running", in_flight as f64, &[]);

            let Some(joined) = running.join_next().await else {
                break;
            };
            let outcome = joined.map_err(|join_error| {
                OrchestrationError::Internal(format!("work item task did not finish: {join_error}"))
            })?;
            self.record_outcome(&execution_id, &mut graph, &mut ledger, outcome)
                .await;
        }

        let unreachable = graph.unreachable_work_items();
        for id in &unreachable {
            warn!(execution_id = %execution_id, work_item_id = %id, "Work item never became ready");
        }

        let report = self.build_report(
            execution_id,
            &graph,
            ledger,
            unreachable,
            critical_path,
            parallel_groups,
            warnings,
            started_at,
        );
        let report = self.persist_report(report).await;

        let elapsed_ms = run_timer.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_histogram(
            "executor.run.duration_ms",
            elapsed_ms,
            &[("status", &report.status.to_string())],
        );
        info!(
            execution_id = %report.execution_id,
            status = %report.status,
            completed = report.stats.completed,
            failed = report.stats.failed,
            blocked = report.stats.blocked,
            peak_concurrency = report.stats.peak_concurrency,
            duration_ms = elapsed_ms as u64,
            "🏁 Work item execution finished"
        );
        Ok(report)
    }

    fn build_graph(
        &self,
        items: Vec<WorkItem>,
        warnings: &mut Vec<String>,
    ) -> OrchestrationResult<DependencyGraph> {
        let mut graph = DependencyGraph::new();

        for item in &items {
            if item.id.trim().is_empty() {
                return Err(OrchestrationError::InvalidWorkItem {
                    id: item.id.clone(),
                    reason: "work item id must not be empty".into(),
                });
            }
            let mut node = item.clone();
            node.dependencies.clear();
            node.status = WorkItemStatus::Pending;
            if node.resources.is_empty() {
                node.resources = estimate_resources(&node.description);
            }
            if node.steps.is_empty() {
                node.steps = decompose_steps(&node.description);
            }
            graph.add_work_item(node)?;
        }

        for item in &items {
            for dependency in &item.dependencies {
                graph.add_dependency(&item.id, dependency)?;
            }
        }

        if self.config.infer_dependencies {
            for item in items.iter().filter(|item| item.dependencies.is_empty()) {
                for dependency in infer_dependencies(item, &items) {
                    match graph.add_dependency(&item.id, &dependency) {
                        Ok(()) => debug!(
                            dependent = %item.id,
                            dependency = %dependency,
                            "Inferred dependency from description"
                        ),
                        Err(err) => {
                            warn!(dependent = %item.id, dependency = %dependency, error = %err, "Skipping inferred dependency");
                            warnings.push(format!("skipped inferred dependency: {err}"));
                        }
                    }
                }
            }
        }

        Ok(graph)
    }

    async fn record_outcome(
        &self,
        execution_id: &str,
        graph: &mut DependencyGraph,
        ledger: &mut RunLedger,
        outcome: ItemOutcome,
    ) {
        match outcome {
            ItemOutcome::Completed { mut item, output } => {
                item.status = WorkItemStatus::Completed;
                let id = item.id.clone();
                let attempts = item.retry_count + 1;
                if let Some(slot) = graph.get_mut(&id) {
                    *slot = item;
                }
                ledger.completion_order.push(id.clone());
                ledger.outputs.insert(id.clone(), output);

                log_work_item_operation("complete", execution_id, &id, "COMPLETED", None);
                self.metrics
                    .increment_counter("executor.work_items.completed", 1, &[]);
                self.publish(
                    events::WORK_ITEM_COMPLETED,
                    json!({"execution_id": execution_id, "work_item_id": id, "attempts": attempts}),
                )
                .await;
            }
            ItemOutcome::Requeued { mut item, error } => {
                item.status = WorkItemStatus::Pending;
                warn!(
                    execution_id = %execution_id,
                    work_item_id = %item.id,
                    retry_count = item.retry_count,
                    error = %error,
                    "🔁 Work item returned to pending"
                );
                let id = item.id.clone();
                if let Some(slot) = graph.get_mut(&id) {
                    *slot = item;
                }
            }
            ItemOutcome::Failed { mut item, error } => {
                item.status = WorkItemStatus::Failed;
                item.completed_at = Some(Utc::now());
                let id = item.id.clone();
                let attempts = item.retry_count + 1;
                if let Some(slot) = graph.get_mut(&id) {
                    *slot = item;
                }
                self.fail_item(execution_id, graph, ledger, id, error, attempts)
                    .await;
            }
            ItemOutcome::Panicked { id, message } => {
                let error = format!("work item panicked: {message}");
                let mut attempts = 1;
                if let Some(slot) = graph.get_mut(&id) {
                    slot.status = WorkItemStatus::Failed;
                    slot.completed_at = Some(Utc::now());
                    slot.error_log.push(error.clone());
                    attempts = slot.retry_count + 1;
                }
                error!(execution_id = %execution_id, work_item_id = %id, error = %error, "💥 Work item panicked");
                self.fail_item(execution_id, graph, ledger, id, error, attempts)
                    .await;
            }
        }
    }

    async fn fail_item(
        &self,
        execution_id: &str,
        graph: &mut DependencyGraph,
        ledger: &mut RunLedger,
        id: String,
        error: String,
        attempts: u32,
    ) {
        let newly_blocked = graph.block_dependents(&id);
        log_work_item_operation("fail", execution_id, &id, "FAILED", Some(&error));
        self.metrics
            .increment_counter("executor.work_items.failed", 1, &[]);
        self.publish(
            events::WORK_ITEM_FAILED,
            json!({"execution_id": execution_id, "work_item_id": id, "error": error, "attempts": attempts}),
        )
        .await;

        for blocked in &newly_blocked {
            warn!(execution_id = %execution_id, work_item_id = %blocked, blocked_by = %id, "🚫 Work item blocked by failed dependency");
            self.publish(
                events::WORK_ITEM_BLOCKED,
                json!({"execution_id": execution_id, "work_item_id": blocked, "blocked_by": id}),
            )
            .await;
        }
        ledger.blocked.extend(newly_blocked);
        ledger.failed.push(FailedWorkItem { id, error, attempts });
    }

    async fn publish(&self, name: &str, context: Value) {
        if let Some(events) = &self.events {
            if let Err(err) = events.publish(name, context).await {
                debug!(event = %name, error = %err, "Event publish failed");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_report(
        &self,
        execution_id: String,
        graph: &DependencyGraph,
        mut ledger: RunLedger,
        unreachable: Vec<String>,
        critical_path: Vec<String>,
        parallel_groups: Vec<Vec<String>>,
        warnings: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> ExecutionReport {
        let mut results = BTreeMap::new();
        let mut total_retries = 0;
        let mut total_checkpoints = 0;
        let mut total_execution_seconds = 0.0;

        for item in graph.work_items() {
            total_retries += item.retry_count;
            total_checkpoints += item.checkpoints.len();
            let duration = item.duration();
            if let Some(duration) = duration {
                total_execution_seconds += duration.num_milliseconds() as f64 / 1000.0;
            }
            results.insert(
                item.id.clone(),
                WorkItemResult {
                    status: item.status,
                    attempts: if ledger.started.contains(&item.id) {
                        item.retry_count + 1
                    } else {
                        0
                    },
                    output: ledger.outputs.remove(&item.id),
                    checkpoints: item.checkpoints.len(),
                    duration_ms: duration.map(|d| d.num_milliseconds()),
                    error_log: item.error_log.clone(),
                },
            );
        }

        let total = graph.len();
        let completed = graph.count_by_status(WorkItemStatus::Completed);
        let failed = graph.count_by_status(WorkItemStatus::Failed);
        let blocked = graph.count_by_status(WorkItemStatus::Blocked);
        let status = if completed == total {
            ExecutionStatus::Success
        } else if completed > 0 {
            ExecutionStatus::PartialSuccess
        } else {
            ExecutionStatus::Failed
        };

        let counts = ExecutionCounts {
            total,
            completed,
            failed,
            blocked,
            running: 0,
            pending: unreachable.len(),
            total_execution_seconds,
        };
        let resource_utilization = self.resources.utilization();
        let validation: GraphValidation = graph.validate();
        let monitoring = MonitoringReport::build(
            &counts,
            &resource_utilization,
            self.breaker.status(),
            validation,
        );
        let ratio = |n: usize| if total > 0 { n as f64 / total as f64 } else { 0.0 };

        ExecutionReport {
            execution_id,
            status,
            execution_order: ledger.execution_order,
            completion_order: ledger.completion_order,
            critical_path,
            parallel_groups,
            results,
            failed: ledger.failed,
            blocked: ledger.blocked,
            stats: ExecutionStats {
                total,
                completed,
                failed,
                blocked,
                unreachable: unreachable.len(),
                success_rate: ratio(completed),
                failure_rate: ratio(failed),
                total_retries,
                total_checkpoints,
                peak_concurrency: ledger.peak_concurrency,
                average_execution_seconds: monitoring.performance.average_execution_seconds,
                resource_utilization,
            },
            unreachable,
            monitoring,
            warnings,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Store the final report under the execution id when persistence is attached
    async fn persist_report(&self, mut report: ExecutionReport) -> ExecutionReport {
        let Some(persistence) = &self.persistence else {
            return report;
        };
        let saved = match serde_json::to_value(&report) {
            Ok(value) => persistence
                .save_state(&report.execution_id, &value)
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(err) = saved {
            warn!(execution_id = %report.execution_id, error = %err, "Failed to persist execution report");
            report
                .warnings
                .push(format!("execution report not persisted: {err}"));
        }
        report
    }
}

impl RunContext {
    /// Execute one work item; `reserved` is set when the scheduler already
    /// holds its resources
    async fn run_item(&self, mut item: WorkItem, reserved: bool) -> ItemOutcome {
        let reserved = reserved
            || self
                .resources
                .reserve(&item.id, &item.resources, self.config.reservation_timeout)
                .await;
        if !reserved {
            let error = "resource reservation failed".to_string();
            item.error_log.push(error.clone());
            if item.retry_count < self.config.failure_retry_limit {
                item.retry_count += 1;
                tokio::time::sleep(self.retry.calculate_delay(item.retry_count - 1)).await;
                return ItemOutcome::Requeued { item, error };
            }
            return ItemOutcome::Failed { item, error };
        }
        let _reservation = self.resources.reservation_guard(item.id.clone());

        let steps = item.steps.clone();
        let (mut index, mut outputs) = restore_point(&item);

        while index < steps.len() {
            match self.run_step(&item, index, &steps[index], &outputs).await {
                Ok(output) => {
                    outputs.push(output);
                    index += 1;
                    if index % self.config.checkpoint_interval == 0 && index < steps.len() {
                        self.checkpoint(&mut item, index, &outputs).await;
                    }
                }
                Err(step_error) => {
                    let error = format!("step {index} '{}' failed: {step_error}", steps[index]);
                    item.error_log.push(error.clone());

                    if !step_error.is_retryable()
                        || item.retry_count >= self.config.failure_retry_limit
                    {
                        return ItemOutcome::Failed { item, error };
                    }

                    item.retry_count += 1;
                    (index, outputs) = restore_point(&item);
                    warn!(
                        execution_id = %self.execution_id,
                        work_item_id = %item.id,
                        retry_count = item.retry_count,
                        resume_step = index,
                        error = %step_error,
                        "⏪ Rolled back to last checkpoint"
                    );
                    tokio::time::sleep(self.retry.calculate_delay(item.retry_count - 1)).await;
                }
            }
        }

        item.completed_at = Some(Utc::now());
        ItemOutcome::Completed {
            item,
            output: Value::Array(outputs),
        }
    }

    /// Circuit breaker → retry manager → timeout around one step
    async fn run_step(
        &self,
        item: &WorkItem,
        index: usize,
        step: &str,
        outputs: &[Value],
    ) -> Result<Value, StepError> {
        let operation = format!("{}#{index}", item.id);
        let operation = operation.as_str();
        let timeout = self.config.step_timeout;
        let retry = &self.retry;
        let runner = &self.runner;

        let result = self
            .breaker
            .call(|| {
                retry.execute_with_retry(operation, || async move {
                    match tokio::time::timeout(timeout, runner.run_step(item, index, step, outputs))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StepError::timeout(format!(
                            "step exceeded {}ms",
                            timeout.as_millis()
                        ))),
                    }
                })
            })
            .await;

        match result {
            Ok(output) => Ok(output),
            Err(CircuitBreakerError::OperationFailed(error)) => Err(error),
            Err(CircuitBreakerError::CircuitOpen { component }) => Err(StepError::new(
                ErrorCategory::Transient,
                format!("circuit breaker {component} is open"),
            )),
        }
    }

    async fn checkpoint(&self, item: &mut WorkItem, step_index: usize, outputs: &[Value]) {
        let checkpoint = Checkpoint {
            work_item_id: item.id.clone(),
            step_index,
            captured_state: json!({
                "status": WorkItemStatus::Running,
                "step_index": step_index,
                "outputs": outputs,
                "resources": self.resources.allocation_for(&item.id),
            }),
            timestamp: Utc::now(),
        };

        if let Some(persistence) = &self.persistence {
            let checkpoint_id = format!("{}_step_{step_index}", item.id);
            let saved = match serde_json::to_value(&checkpoint) {
                Ok(value) => persistence
                    .save_checkpoint(&self.execution_id, &checkpoint_id, &value)
                    .await
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            if let Err(err) = saved {
                warn!(
                    execution_id = %self.execution_id,
                    work_item_id = %item.id,
                    error = %err,
                    "Checkpoint not persisted"
                );
            }
        }

        debug!(work_item_id = %item.id, step_index, "📍 Checkpoint recorded");
        item.push_checkpoint(checkpoint, self.config.checkpoint_history);
    }
}

/// Step index and outputs to resume from: the latest checkpoint, or the start
fn restore_point(item: &WorkItem) -> (usize, Vec<Value>) {
    match item.latest_checkpoint() {
        Some(checkpoint) => (
            checkpoint.step_index,
            checkpoint
                .captured_state
                .get("outputs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        ),
        None => (0, Vec::new()),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
