//! Workflow engine driven end to end with scripted crews

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use studio_core::constants::{events, states};
use studio_core::state_machine::WorkflowError;
use studio_core::{
    BuilderCrew, CrewOutput, CrewRegistry, EventPublisher, InMemoryMetrics,
    InMemoryProjectRegistry, PersistenceConfig, PersistenceManager, PersistentProjectRegistry,
    ProjectRegistry, ProjectState, StudioError, TaskExecutor, TransitionKind, WorkflowCatalog,
    WorkflowEngine, WorkflowEngineConfig,
};
use tempfile::TempDir;

fn engine(yaml: &str, crews: CrewRegistry) -> WorkflowEngine {
    WorkflowEngine::new(
        Arc::new(WorkflowCatalog::from_yaml_str(yaml).unwrap()),
        Arc::new(crews),
        WorkflowEngineConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_single_crew_reaches_completed_in_one_transition() {
    let crews = CrewRegistry::new().with_crew("X", static_crew("X", CrewOutput::success()));
    let engine = engine(
        "w:\n  sequence:\n    - { state: A, crew: X }\n    - { state: COMPLETED }\n",
        crews,
    );

    let project = ProjectState::new("p1", "todo app").with_workflow("w").with_state("A");
    let run = engine.run(project).await.unwrap();

    assert_eq!(run.project().state, states::COMPLETED);
    assert_eq!(run.transitions(), 1);
    let transition = run.history().next().unwrap();
    assert_eq!(transition.from_state, "A");
    assert_eq!(transition.to_state, states::COMPLETED);
    assert_eq!(transition.crews, vec!["X"]);
}

#[tokio::test]
async fn test_unknown_workflow_is_rejected_at_start() {
    let engine = engine(
        "w:\n  sequence:\n    - { state: A, crew: X }\n",
        CrewRegistry::new().with_crew("X", static_crew("X", CrewOutput::success())),
    );
    let result = engine
        .start(ProjectState::new("p", "idea").with_workflow("missing"))
        .await;
    assert!(matches!(
        result,
        Err(StudioError::Workflow(WorkflowError::UnknownWorkflow(_)))
    ));
}

#[tokio::test]
async fn test_crew_data_is_merged_into_project() {
    let crews = CrewRegistry::new()
        .with_crew(
            "Validator",
            static_crew(
                "Validator",
                CrewOutput::success().with_data(json!({"validation": {"approved": true, "score": 8}})),
            ),
        )
        .with_crew(
            "Planner",
            static_crew(
                "Planner",
                CrewOutput::success().with_data(json!({"validation": {"notes": "ok"}, "plan": ["mvp"]})),
            ),
        );
    let engine = engine(
        r#"
w:
  sequence:
    - { state: VALIDATE, crew: Validator }
    - state: PLAN
      crew: Planner
      conditions:
        - { field: validation.score, operator: ">=", value: 7 }
"#,
        crews,
    );

    let run = engine
        .run(ProjectState::new("p", "idea").with_workflow("w"))
        .await
        .unwrap();
    let project = run.project();
    assert_eq!(project.state, states::COMPLETED);
    assert_eq!(
        project.fields["validation"],
        json!({"approved": true, "score": 8, "notes": "ok"})
    );
    assert_eq!(project.fields["plan"], json!(["mvp"]));
    assert_eq!(project.idea(), Some("idea"));
}

#[tokio::test]
async fn test_escalation_switches_workflow_and_is_persisted() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(PersistenceManager::new(PersistenceConfig::new(dir.path())));
    let registry = Arc::new(PersistentProjectRegistry::new(store));
    let publisher = EventPublisher::new(128);
    let mut events_rx = publisher.subscribe();

    let crews = CrewRegistry::new()
        .with_crew(
            "Validator",
            static_crew("Validator", CrewOutput::success().with_field("score", json!(3))),
        )
        .with_crew("Builder", static_crew("Builder", CrewOutput::success()))
        .with_crew("Prototyper", static_crew("Prototyper", CrewOutput::success()));
    let engine = engine(
        r#"
full_build:
  sequence:
    - { state: VALIDATE, crew: Validator }
    - state: BUILD
      crew: Builder
      conditions:
        - { field: score, operator: ">", value: 5 }
      on_fail: { escalate_to: rapid_prototype }
rapid_prototype:
  sequence:
    - { state: PROTOTYPE, crew: Prototyper }
"#,
        crews,
    )
    .with_registry(registry.clone())
    .with_events(publisher);

    let run = engine
        .run(ProjectState::new("p-esc", "idea").with_workflow("full_build"))
        .await
        .unwrap();

    assert_eq!(run.project().workflow, "rapid_prototype");
    assert_eq!(run.project().state, states::COMPLETED);
    let kinds: Vec<_> = run.history().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TransitionKind::Advanced,
            TransitionKind::Escalated,
            TransitionKind::Advanced
        ]
    );

    let escalations = registry.escalations("p-esc").await.unwrap();
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].from_workflow, "full_build");
    assert_eq!(escalations[0].reason, "condition_failure");

    let stored = registry.load_project_state("p-esc").await.unwrap().unwrap();
    assert_eq!(stored.state, states::COMPLETED);
    assert_eq!(stored.workflow, "rapid_prototype");

    let mut names = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        names.push(event.name);
    }
    assert!(names.iter().any(|n| n == events::WORKFLOW_ESCALATED));
    assert_eq!(names.last().map(String::as_str), Some(events::WORKFLOW_FINISHED));
}

#[tokio::test]
async fn test_crew_crash_rolls_back_to_last_good_state() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(PersistenceManager::new(PersistenceConfig::new(dir.path())));
    let registry = Arc::new(PersistentProjectRegistry::new(store));

    let crews = CrewRegistry::new()
        .with_crew("Ok", static_crew("Ok", CrewOutput::success().with_field("step1", json!(true))))
        .with_crew(
            "Broken",
            Arc::new(studio_core::FnCrew::new("Broken", |_ctx| async {
                Err(studio_core::CrewError::Failed("model unavailable".into()))
            })),
        );
    let engine = engine(
        "w:\n  sequence:\n    - { state: ONE, crew: Ok }\n    - { state: TWO, crew: Broken }\n",
        crews,
    )
    .with_registry(registry.clone());

    let run = engine
        .run(ProjectState::new("p-crash", "idea").with_workflow("w"))
        .await
        .unwrap();
    assert_eq!(run.project().state, states::ERROR);
    assert!(run.project().fields["error"]
        .as_str()
        .unwrap()
        .contains("model unavailable"));

    let stored = registry.load_project_state("p-crash").await.unwrap().unwrap();
    assert_eq!(stored.state, "TWO");
    assert_eq!(stored.fields["step1"], json!(true));
    assert!(!stored.fields.contains_key("error"));
}

#[tokio::test]
async fn test_transition_cap_forces_error() {
    let crews = CrewRegistry::new()
        .with_crew("Loop", RecordingCrew::new("Loop"))
        .with_crew("Other", RecordingCrew::new("Other"));
    let catalog = Arc::new(
        WorkflowCatalog::from_yaml_str(
            "w:\n  sequence:\n    - { state: A, crew: Loop }\n    - { state: B, crew: Other }\n    - { state: C, crew: Loop }\n",
        )
        .unwrap(),
    );
    let engine = WorkflowEngine::new(
        catalog,
        Arc::new(crews),
        WorkflowEngineConfig {
            max_transitions: 2,
            ..WorkflowEngineConfig::default()
        },
    )
    .unwrap();

    let run = engine
        .run(ProjectState::new("p", "idea").with_workflow("w"))
        .await
        .unwrap();
    assert_eq!(run.project().state, states::ERROR);
    assert_eq!(run.transitions(), 2);
    assert_eq!(
        run.history().last().map(|t| t.kind),
        Some(TransitionKind::TransitionCap)
    );
}

#[tokio::test]
async fn test_repeated_self_jump_is_a_livelock() {
    let crews = CrewRegistry::new().with_crew(
        "Retry",
        static_crew("Retry", CrewOutput::success().with_next_state("DRAFT")),
    );
    let engine = engine("w:\n  sequence:\n    - { state: DRAFT, crew: Retry }\n", crews);

    let run = engine
        .run(ProjectState::new("p", "idea").with_workflow("w"))
        .await
        .unwrap();
    assert_eq!(run.project().state, states::ERROR);
    assert_eq!(
        run.history().last().map(|t| t.kind),
        Some(TransitionKind::Livelock)
    );
    assert!(run.transitions() < 5);
}

#[tokio::test]
async fn test_parallel_group_runs_eligible_branches() {
    let legal = RecordingCrew::new("Legal");
    let marketing = RecordingCrew::new("Marketing");
    let finance = RecordingCrew::new("Finance");
    let crews = CrewRegistry::new()
        .with_crew("Legal", legal.clone())
        .with_crew("Marketing", marketing.clone())
        .with_crew("Finance", finance.clone());
    let engine = engine(
        r#"
w:
  sequence:
    - parallel:
        - { state: LEGAL, crew: Legal }
        - { state: MARKETING, crew: Marketing }
        - state: FINANCE
          crew: Finance
          conditions:
            - { field: budget, operator: exists }
"#,
        crews,
    );

    let run = engine
        .run(ProjectState::new("p", "idea").with_workflow("w"))
        .await
        .unwrap();
    assert_eq!(run.project().state, states::COMPLETED);
    assert_eq!(legal.count(), 1);
    assert_eq!(marketing.count(), 1);
    assert_eq!(finance.count(), 0);
    assert_eq!(
        run.project().fields["visits"],
        json!({"LEGAL": 1, "MARKETING": 1})
    );
    assert_eq!(run.transitions(), 1);
}

#[tokio::test]
async fn test_loop_iterates_until_max_iterations() {
    let refiner = RecordingCrew::new("Refiner");
    let crews = CrewRegistry::new().with_crew("Refiner", refiner.clone());
    let engine = engine(
        r#"
w:
  sequence:
    - loop:
        state_prefix: REFINEMENT
        crew: Refiner
        max_iterations: 3
        break_conditions:
          - { field: approved, value: true }
"#,
        crews,
    );

    let run = engine
        .run(ProjectState::new("p", "idea").with_workflow("w"))
        .await
        .unwrap();
    assert_eq!(run.project().state, states::COMPLETED);
    assert_eq!(
        refiner.states(),
        vec!["REFINEMENT_1", "REFINEMENT_2", "REFINEMENT_3"]
    );
    let contexts = refiner.contexts.lock();
    assert_eq!(contexts[0].iteration, Some(1));
    assert_eq!(contexts[2].iteration, Some(3));
}

#[tokio::test]
async fn test_builtin_workflow_with_builder_crew() {
    let executor = Arc::new(
        TaskExecutor::new(fast_executor_config()).with_runner(Arc::new(InstrumentedRunner::default())),
    );
    let registry = Arc::new(InMemoryProjectRegistry::new());
    let metrics = Arc::new(InMemoryMetrics::new());
    let crews = CrewRegistry::new()
        .with_crew(
            "ValidatorCrew",
            static_crew(
                "ValidatorCrew",
                CrewOutput::success().with_data(json!({
                    "tasks": [
                        "Design the schema",
                        {"id": "api", "description": "Build the API", "dependencies": ["task_1"], "steps": ["code", "test"]}
                    ]
                })),
            ),
        )
        .with_crew("BuilderCrew", Arc::new(BuilderCrew::new(executor)))
        .with_crew(
            "FeedbackCrew",
            scripted_crew("FeedbackCrew", vec![CrewOutput::success().with_field("feedback", json!("great"))]),
        );
    let engine = WorkflowEngine::new(
        Arc::new(WorkflowCatalog::builtin()),
        Arc::new(crews),
        WorkflowEngineConfig {
            crew_timeout: Duration::from_secs(30),
            ..WorkflowEngineConfig::default()
        },
    )
    .unwrap()
    .with_registry(registry.clone())
    .with_metrics(metrics.clone());

    let run = engine.run(ProjectState::new("studio-1", "A recipe app")).await.unwrap();
    let project = run.project();

    assert_eq!(project.state, states::COMPLETED);
    assert_eq!(project.fields["execution"]["status"], "success");
    assert_eq!(project.fields["execution"]["execution_order"], json!(["task_1", "api"]));
    assert_eq!(project.fields["feedback"], "great");
    assert_eq!(
        registry.saved_states(),
        vec!["IDEA_VALIDATION", "TASK_EXECUTION", "FEEDBACK_COLLECTION", "COMPLETED"]
    );
    assert_eq!(metrics.counter_total("workflow.transitions"), 3);
    assert_eq!(metrics.counter_total("crew.invocations"), 3);

    let summary = engine.execution_summary(&run);
    assert_eq!(summary.transitions, 3);
    assert!(summary.finished);
}

#[tokio::test]
async fn test_unsaveable_state_fails_project_at_last_good_record() {
    let registry = Arc::new(UnreliableRegistry::refusing_state("B"));
    let crews = CrewRegistry::new().with_crew("X", static_crew("X", CrewOutput::success()));
    let engine = engine(
        "w:\n  sequence:\n    - { state: A, crew: X }\n    - { state: B, crew: X }\n",
        crews,
    )
    .with_registry(registry.clone());

    let run = engine
        .run(ProjectState::new("p", "idea").with_workflow("w"))
        .await
        .unwrap();

    assert_eq!(run.project().state, states::ERROR);
    assert!(run.project().fields["error"]
        .as_str()
        .unwrap()
        .contains("could not be persisted"));
    assert_eq!(run.transitions(), 1);
    let last = run.history().last().unwrap();
    assert_eq!(last.kind, TransitionKind::Failed);
    assert_eq!(last.from_state, "A");

    assert_eq!(registry.inner.saved_states(), vec!["A"]);
    let persisted = registry.load_project_state("p").await.unwrap().unwrap();
    assert_eq!(persisted.state, "A");
}

#[tokio::test]
async fn test_unloggable_escalation_fails_without_switching_workflow() {
    let registry = Arc::new(UnreliableRegistry::refusing_escalations());
    let publisher = EventPublisher::new(64);
    let mut subscriber = publisher.subscribe();
    let crews = CrewRegistry::new()
        .with_crew("Validator", static_crew("Validator", CrewOutput::error("weak market")))
        .with_crew("Builder", static_crew("Builder", CrewOutput::success()));
    let engine = engine(
        r#"
main:
  sequence:
    - state: VALIDATE
      crew: Validator
      on_fail: { escalate_to: lean }
lean:
  sequence:
    - { state: PROTOTYPE, crew: Builder }
"#,
        crews,
    )
    .with_registry(registry.clone())
    .with_events(publisher);

    let run = engine
        .run(ProjectState::new("p", "idea").with_workflow("main"))
        .await
        .unwrap();

    assert_eq!(run.project().workflow, "main");
    assert_eq!(run.project().state, states::ERROR);
    assert!(run.project().fields["error"]
        .as_str()
        .unwrap()
        .contains("could not be logged"));
    assert_eq!(run.history().last().unwrap().kind, TransitionKind::Failed);
    assert!(registry.escalations("p").await.unwrap().is_empty());

    let mut names = Vec::new();
    while let Ok(event) = subscriber.try_recv() {
        names.push(event.name);
    }
    assert!(!names.iter().any(|name| name == events::WORKFLOW_ESCALATED));
    assert!(names.iter().any(|name| name == events::WORKFLOW_FINISHED));
}
