//! # Registries
//!
//! Explicit objects constructed once at startup and handed to the
//! [`WorkflowEngine`](crate::state_machine::WorkflowEngine):
//!
//! - [`CrewRegistry`]: crew name → factory
//! - [`ProjectRegistry`]: durable project records, rollback and escalation log

pub mod crew_registry;
pub mod project_registry;

pub use crew_registry::{CrewFactory, CrewRegistry};
pub use project_registry::{
    EscalationRecord, InMemoryProjectRegistry, PersistentProjectRegistry, ProjectRegistry,
};
