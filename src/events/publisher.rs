//! # Event Publisher
//!
//! Fan-out of lifecycle events (workflow transitions, escalations, work item
//! outcomes) over a tokio broadcast channel. Publishing never blocks and never
//! fails for lack of subscribers; slow subscribers observe `Lagged` instead of
//! back-pressuring the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Event that has been published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioEvent {
    pub name: String,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

impl StudioEvent {
    /// Context field lookup, `None` when absent or not a string
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPublisherStats {
    pub published: u64,
    /// Events sent while nobody was subscribed
    pub unobserved: u64,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    unobserved: AtomicU64,
}

/// Cloneable handle; clones share one channel
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<StudioEvent>,
    counters: Arc<Counters>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            counters: Arc::default(),
        }
    }

    /// Publish an event with the given name and context
    pub async fn publish(
        &self,
        event_name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let event = StudioEvent {
            name: event_name.into(),
            context,
            published_at: Utc::now(),
        };
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            self.counters.unobserved.fetch_add(1, Ordering::Relaxed);
            trace!(event = %event.name, "Event published without subscribers");
        }
        Ok(())
    }

    /// Serialize `payload` into the event context before publishing
    pub async fn publish_serialized<T: Serialize>(
        &self,
        event_name: impl Into<String>,
        payload: &T,
    ) -> Result<(), PublishError> {
        let context = serde_json::to_value(payload)?;
        self.publish(event_name, context).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StudioEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.counters.published.load(Ordering::Relaxed),
            unobserved: self.counters.unobserved.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
