//! Builder crew: runs the project's task list through a [`TaskExecutor`].
//!
//! `tasks` in the project record is a list whose entries are either plain
//! descriptions or work item objects (`{id?, description, priority?,
//! dependencies?, steps?, resources?}`). The execution report is returned
//! under `execution`.

use super::crew::{Crew, CrewContext, CrewError, CrewOutput};
use crate::orchestration::{ExecutionStatus, TaskExecutor, WorkItem};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub const BUILDER_CREW: &str = "BuilderCrew";

pub struct BuilderCrew {
    executor: Arc<TaskExecutor>,
    tasks_field: String,
}

impl BuilderCrew {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self {
            executor,
            tasks_field: "tasks".to_string(),
        }
    }

    /// Read work items from another record field
    pub fn with_tasks_field(mut self, field: impl Into<String>) -> Self {
        self.tasks_field = field.into();
        self
    }

    pub fn work_items_from(tasks: &Value) -> Result<Vec<WorkItem>, CrewError> {
        let Value::Array(entries) = tasks else {
            return Err(CrewError::InvalidContext("tasks must be a list".into()));
        };
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let default_id = format!("task_{}", index + 1);
                match entry {
                    Value::String(description) => Ok(WorkItem::new(default_id, description.clone())),
                    Value::Object(fields) => {
                        let mut fields = fields.clone();
                        fields
                            .entry("id")
                            .or_insert_with(|| Value::String(default_id));
                        serde_json::from_value(Value::Object(fields)).map_err(|e| {
                            CrewError::InvalidContext(format!("task {}: {e}", index + 1))
                        })
                    }
                    other => Err(CrewError::InvalidContext(format!(
                        "task {} must be a string or an object, got {other}",
                        index + 1
                    ))),
                }
            })
            .collect()
    }
}

#[async_trait]
impl Crew for BuilderCrew {
    fn name(&self) -> &str {
        BUILDER_CREW
    }

    async fn run(&self, context: CrewContext) -> Result<CrewOutput, CrewError> {
        let Some(tasks) = context.get(&self.tasks_field) else {
            return Ok(CrewOutput::skipped("no tasks to execute"));
        };
        let items = Self::work_items_from(tasks)?;
        if items.is_empty() {
            return Ok(CrewOutput::skipped("no tasks to execute"));
        }

        info!(
            project_id = %context.project_id,
            state = %context.state,
            work_items = items.len(),
            "🏗️ Builder crew executing work items"
        );
        let report = self.executor.execute(items).await?;
        let status = report.status;
        let summary = format!(
            "{} of {} work items completed",
            report.stats.completed, report.stats.total
        );
        let execution = serde_json::to_value(&report)
            .map_err(|e| CrewError::Failed(format!("report serialization failed: {e}")))?;

        let output = match status {
            ExecutionStatus::Success | ExecutionStatus::PartialSuccess => CrewOutput::success(),
            ExecutionStatus::Failed => CrewOutput::error("no work items completed"),
        };
        Ok(output
            .with_message(summary)
            .with_data(json!({ "execution": execution })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crews::CrewStatus;
    use crate::orchestration::{ExecutorConfig, SimulatedStepRunner, WorkItemStatus};
    use std::time::Duration;

    fn crew() -> BuilderCrew {
        let executor = TaskExecutor::new(ExecutorConfig::default())
            .with_runner(Arc::new(SimulatedStepRunner::new(Duration::ZERO)));
        BuilderCrew::new(Arc::new(executor))
    }

    fn context(record: Value) -> CrewContext {
        CrewContext {
            project_id: "p1".into(),
            workflow: "default_software_build".into(),
            state: "TASK_EXECUTION".into(),
            iteration: None,
            record,
        }
    }

    #[test]
    fn test_work_items_from_mixed_entries() {
        let items = BuilderCrew::work_items_from(&json!([
            "design the schema",
            {"id": "api", "description": "build the api", "dependencies": ["task_1"], "priority": "HIGH"},
            {"description": "write docs"}
        ]))
        .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "task_1");
        assert_eq!(items[1].id, "api");
        assert!(items[1].dependencies.contains("task_1"));
        assert_eq!(items[2].id, "task_3");

        assert!(BuilderCrew::work_items_from(&json!("nope")).is_err());
        assert!(BuilderCrew::work_items_from(&json!([42])).is_err());
    }

    #[tokio::test]
    async fn test_builder_runs_tasks_and_reports() {
        let output = crew()
            .run(context(json!({
                "tasks": [
                    {"id": "schema", "description": "design schema", "steps": ["draft", "review"]},
                    {"id": "api", "description": "build endpoints", "dependencies": ["schema"], "steps": ["code"]}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(output.status, CrewStatus::Success);
        let execution = output.data.get("execution").unwrap();
        assert_eq!(execution["status"], json!("success"));
        assert_eq!(execution["execution_order"], json!(["schema", "api"]));
        assert_eq!(
            serde_json::from_value::<WorkItemStatus>(execution["results"]["api"]["status"].clone())
                .unwrap(),
            WorkItemStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_builder_skips_without_tasks() {
        let output = crew().run(context(json!({"idea": "x"}))).await.unwrap();
        assert_eq!(output.status, CrewStatus::Skipped);
    }
}
