//! Lifecycle event fan-out. Event names live in [`crate::constants::events`].

pub mod publisher;

pub use publisher::{EventPublisher, EventPublisherStats, PublishError, StudioEvent};
