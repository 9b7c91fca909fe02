//! # System Constants
//!
//! Terminal state names, lifecycle event names and default operating limits
//! shared across the orchestration core.

/// Reserved workflow state names
pub mod states {
    pub const COMPLETED: &str = "COMPLETED";
    pub const ERROR: &str = "ERROR";
    pub const FAILED: &str = "FAILED";

    /// Whether a project in this state has finished its run
    pub fn is_terminal(state: &str) -> bool {
        matches!(state, COMPLETED | ERROR | FAILED)
    }
}

/// Lifecycle events published on the [`EventPublisher`](crate::events::EventPublisher)
pub mod events {
    pub const WORKFLOW_TRANSITION: &str = "workflow.transition";
    pub const WORKFLOW_ESCALATED: &str = "workflow.escalated";
    pub const WORKFLOW_FINISHED: &str = "workflow.finished";
    pub const CREW_FAILED: &str = "crew.failed";
    pub const WORK_ITEM_COMPLETED: &str = "work_item.completed";
    pub const WORK_ITEM_FAILED: &str = "work_item.failed";
    pub const WORK_ITEM_BLOCKED: &str = "work_item.blocked";
}

/// Project record keys owned by the workflow engine
pub mod record_keys {
    pub const ID: &str = "id";
    pub const WORKFLOW: &str = "workflow";
    pub const STATE: &str = "state";

    pub const RESERVED: [&str; 3] = [ID, WORKFLOW, STATE];
}

pub const DEFAULT_WORKFLOW: &str = "default_software_build";
pub const DEFAULT_MAX_TRANSITIONS: usize = 50;
pub const DEFAULT_CREW_TIMEOUT_SECONDS: u64 = 300;

pub const DEFAULT_CHECKPOINT_HISTORY: usize = 10;
pub const DEFAULT_BACKUP_RETENTION: usize = 10;
