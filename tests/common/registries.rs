use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use studio_core::persistence::PersistenceError;
use studio_core::registry::EscalationRecord;
use studio_core::{InMemoryProjectRegistry, ProjectRegistry, ProjectState, Result, StudioError};

/// In-memory registry whose storage refuses selected writes
#[derive(Debug, Default)]
pub struct UnreliableRegistry {
    pub inner: InMemoryProjectRegistry,
    refuse_state: Option<String>,
    refuse_escalations: bool,
}

impl UnreliableRegistry {
    /// Saving a project in `state` errors
    pub fn refusing_state(state: &str) -> Self {
        Self {
            refuse_state: Some(state.to_string()),
            ..Self::default()
        }
    }

    /// Every escalation log write errors
    pub fn refusing_escalations() -> Self {
        Self {
            refuse_escalations: true,
            ..Self::default()
        }
    }
}

fn disk_full(target: &str) -> StudioError {
    StudioError::Persistence(PersistenceError::Io {
        operation: "write",
        path: PathBuf::from(target),
        source: io::Error::new(io::ErrorKind::Other, "no space left on device"),
    })
}

#[async_trait]
impl ProjectRegistry for UnreliableRegistry {
    async fn save_project_state(&self, project: &ProjectState) -> Result<()> {
        if self.refuse_state.as_deref() == Some(project.state.as_str()) {
            return Err(disk_full(&project.id));
        }
        self.inner.save_project_state(project).await
    }

    async fn load_project_state(&self, project_id: &str) -> Result<Option<ProjectState>> {
        self.inner.load_project_state(project_id).await
    }

    async fn log_escalation(&self, escalation: EscalationRecord) -> Result<()> {
        if self.refuse_escalations {
            return Err(disk_full(&escalation.project_id));
        }
        self.inner.log_escalation(escalation).await
    }

    async fn escalations(&self, project_id: &str) -> Result<Vec<EscalationRecord>> {
        self.inner.escalations(project_id).await
    }
}
