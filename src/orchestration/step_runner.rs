//! Step execution seam for the [`TaskExecutor`](crate::orchestration::TaskExecutor).
//!
//! The executor owns scheduling, resources, retries and checkpoints; a
//! [`StepRunner`] only performs one step of one work item.

use super::errors::StepError;
use super::work_item::WorkItem;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Runs a single step of a work item
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute `step` (at `step_index` of the item's step list).
    ///
    /// `outputs` holds the results of the steps already completed in this
    /// attempt, after any rollback.
    async fn run_step(
        &self,
        item: &WorkItem,
        step_index: usize,
        step: &str,
        outputs: &[Value],
    ) -> Result<Value, StepError>;
}

/// Runner that completes every step after an optional fixed latency
#[derive(Debug, Clone, Default)]
pub struct SimulatedStepRunner {
    latency: Duration,
}

impl SimulatedStepRunner {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl StepRunner for SimulatedStepRunner {
    async fn run_step(
        &self,
        item: &WorkItem,
        step_index: usize,
        step: &str,
        _outputs: &[Value],
    ) -> Result<Value, StepError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(json!({
            "work_item_id": item.id,
            "step_index": step_index,
            "step": step,
            "status": "completed",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_runner_echoes_step() {
        let runner = SimulatedStepRunner::default();
        let item = WorkItem::new("docs", "Write docs");
        let output = runner.run_step(&item, 2, "publish", &[]).await.unwrap();
        assert_eq!(output["step"], "publish");
        assert_eq!(output["step_index"], 2);
        assert_eq!(output["work_item_id"], "docs");
    }
}
