//! # Work Items
//!
//! Units of work scheduled by the [`TaskExecutor`](crate::orchestration::TaskExecutor):
//! priority, lifecycle status, resource requirements and the bounded checkpoint
//! history used for rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Scheduling priority, ordered `Low < Medium < High < Critical`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "LOW"),
            Priority::Medium => write!(f, "MEDIUM"),
            Priority::High => write!(f, "HIGH"),
            Priority::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!("Unknown priority: {s}")),
        }
    }
}

/// Lifecycle status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

impl WorkItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Completed
                | WorkItemStatus::Failed
                | WorkItemStatus::Blocked
                | WorkItemStatus::Cancelled
        )
    }

    /// Statuses that can still make progress in the current run
    pub fn is_schedulable(&self) -> bool {
        matches!(self, WorkItemStatus::Pending | WorkItemStatus::Ready)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkItemStatus::Pending => "PENDING",
            WorkItemStatus::Ready => "READY",
            WorkItemStatus::Running => "RUNNING",
            WorkItemStatus::Completed => "COMPLETED",
            WorkItemStatus::Failed => "FAILED",
            WorkItemStatus::Blocked => "BLOCKED",
            WorkItemStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{name}")
    }
}

/// Kind of a finite resource pool
///
/// Serialized as a plain string (`cpu`, `memory`, `network`, `external_api`, or
/// any other name for a custom pool) so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Network,
    ExternalApi,
    Custom(String),
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "cpu"),
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::ExternalApi => write!(f, "external_api"),
            ResourceKind::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for ResourceKind {
    fn from(value: &str) -> Self {
        match value {
            "cpu" => ResourceKind::Cpu,
            "memory" => ResourceKind::Memory,
            "network" => ResourceKind::Network,
            "external_api" => ResourceKind::ExternalApi,
            other => ResourceKind::Custom(other.to_string()),
        }
    }
}

impl Serialize for ResourceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ResourceKind::from(name.as_str()))
    }
}

/// Amount of one resource kind a work item needs while running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub kind: ResourceKind,
    pub amount: u64,
}

impl ResourceRequirement {
    pub fn new(kind: impl Into<ResourceKind>, amount: u64) -> Self {
        Self {
            kind: kind.into(),
            amount,
        }
    }
}

/// Snapshot taken during multi-step execution, used to roll back after a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub work_item_id: String,
    /// Index of the next step to run when resuming from this checkpoint
    pub step_index: usize,
    pub captured_state: Value,
    pub timestamp: DateTime<Utc>,
}

/// A schedulable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    /// Ids this item waits on; explicit declarations disable inference for the item
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub status: WorkItemStatus,
    /// Explicit requirements; estimated from the description when empty
    #[serde(default)]
    pub resources: Vec<ResourceRequirement>,
    /// Explicit steps; decomposed from the description when empty
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub checkpoints: VecDeque<Checkpoint>,
    #[serde(default)]
    pub error_log: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: Priority::default(),
            dependencies: BTreeSet::new(),
            status: WorkItemStatus::Pending,
            resources: Vec::new(),
            steps: Vec::new(),
            retry_count: 0,
            checkpoints: VecDeque::new(),
            error_log: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_resource(mut self, kind: impl Into<ResourceKind>, amount: u64) -> Self {
        self.resources.push(ResourceRequirement::new(kind, amount));
        self
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Append a checkpoint, dropping the oldest beyond `history`
    pub fn push_checkpoint(&mut self, checkpoint: Checkpoint, history: usize) {
        self.checkpoints.push_back(checkpoint);
        while self.checkpoints.len() > history.max(1) {
            self.checkpoints.pop_front();
        }
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.back()
    }

    /// Wall-clock duration of the last run, when it both started and finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
