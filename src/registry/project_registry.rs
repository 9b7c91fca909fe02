//! # Project Registry
//!
//! Durable home of project records between workflow transitions. The engine
//! saves after every successful transition, asks for a rollback when a step
//! fails, and logs workflow escalations here.
//!
//! Only good states are ever saved, so "rollback" means reading back the last
//! persisted record.

use crate::error::Result;
use crate::persistence::PersistenceManager;
use crate::state_machine::ProjectState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub project_id: String,
    pub from_workflow: String,
    pub to_workflow: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn new(
        project_id: impl Into<String>,
        from_workflow: impl Into<String>,
        to_workflow: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            from_workflow: from_workflow.into(),
            to_workflow: to_workflow.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn save_project_state(&self, project: &ProjectState) -> Result<()>;

    async fn load_project_state(&self, project_id: &str) -> Result<Option<ProjectState>>;

    /// Last persisted good state of the project, if any
    async fn rollback_state(&self, project_id: &str) -> Result<Option<ProjectState>> {
        let restored = self.load_project_state(project_id).await?;
        match &restored {
            Some(project) => info!(
                project_id = %project_id,
                state = %project.state,
                "⏪ Rolled back to last persisted state"
            ),
            None => warn!(project_id = %project_id, "No persisted state to roll back to"),
        }
        Ok(restored)
    }

    async fn log_escalation(&self, escalation: EscalationRecord) -> Result<()>;

    async fn escalations(&self, project_id: &str) -> Result<Vec<EscalationRecord>>;
}

/// [`ProjectRegistry`] on top of the checksummed [`PersistenceManager`] store.
///
/// Records live under the project id; escalations under
/// `<project id>.escalations`.
#[derive(Debug, Clone)]
pub struct PersistentProjectRegistry {
    store: Arc<PersistenceManager>,
}

impl PersistentProjectRegistry {
    pub fn new(store: Arc<PersistenceManager>) -> Self {
        Self { store }
    }

    fn escalation_key(project_id: &str) -> String {
        format!("{project_id}.escalations")
    }
}

#[async_trait]
impl ProjectRegistry for PersistentProjectRegistry {
    async fn save_project_state(&self, project: &ProjectState) -> Result<()> {
        let value = serde_json::to_value(project)?;
        self.store.save_state(&project.id, &value).await?;
        Ok(())
    }

    async fn load_project_state(&self, project_id: &str) -> Result<Option<ProjectState>> {
        match self.store.load_state(project_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn log_escalation(&self, escalation: EscalationRecord) -> Result<()> {
        let key = Self::escalation_key(&escalation.project_id);
        let mut history = self.escalations(&escalation.project_id).await?;
        history.push(escalation);
        self.store
            .save_state(&key, &serde_json::to_value(&history)?)
            .await?;
        Ok(())
    }

    async fn escalations(&self, project_id: &str) -> Result<Vec<EscalationRecord>> {
        match self.store.load_state(&Self::escalation_key(project_id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }
}

/// Process-local registry, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryProjectRegistry {
    projects: Mutex<HashMap<String, ProjectState>>,
    escalations: Mutex<Vec<EscalationRecord>>,
    saves: Mutex<Vec<String>>,
}

impl InMemoryProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// States saved so far, in order
    pub fn saved_states(&self) -> Vec<String> {
        self.saves.lock().clone()
    }
}

#[async_trait]
impl ProjectRegistry for InMemoryProjectRegistry {
    async fn save_project_state(&self, project: &ProjectState) -> Result<()> {
        self.saves.lock().push(project.state.clone());
        self.projects
            .lock()
            .insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn load_project_state(&self, project_id: &str) -> Result<Option<ProjectState>> {
        Ok(self.projects.lock().get(project_id).cloned())
    }

    async fn log_escalation(&self, escalation: EscalationRecord) -> Result<()> {
        self.escalations.lock().push(escalation);
        Ok(())
    }

    async fn escalations(&self, project_id: &str) -> Result<Vec<EscalationRecord>> {
        Ok(self
            .escalations
            .lock()
            .iter()
            .filter(|record| record.project_id == project_id)
            .cloned()
            .collect())
    }
}
