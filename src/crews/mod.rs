//! # Crews
//!
//! The pluggable units of work a workflow dispatches to. Crews are looked up
//! by name in a [`CrewRegistry`](crate::registry::CrewRegistry) and invoked
//! through the [`Crew`] trait only.

pub mod builder;
pub mod crew;

pub use builder::{BuilderCrew, BUILDER_CREW};
pub use crew::{Crew, CrewContext, CrewError, CrewOutput, CrewStatus, FnCrew};
