#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cohort_core::*;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Noop;

#[async_trait]
impl TaskExecutor for Noop {
    async fn execute(&self, _task: &Task) -> CohortResult<TaskOutput> {
        Ok(TaskOutput::new())
    }
}

// ---------------------------------------------------------------------------
// 1. Task serialization roundtrip keeps status, history and dependencies
// ---------------------------------------------------------------------------

#[test]
fn task_serialization_roundtrip() {
    let dep = Uuid::new_v4();
    let mut task = Task::new("Build parser", "Recursive descent parser for the DSL")
        .with_priority(TaskPriority::High)
        .with_required_type(AgentType::Programming)
        .with_capability("rust")
        .with_dependencies(vec![dep])
        .with_input("grammar", serde_json::json!("ebnf"));
    task.transition(TaskStatus::Queued).unwrap();

    let json = serde_json::to_string(&task).unwrap();
    let back: Task = serde_json::from_str(&json).unwrap();

    assert_eq!(back.id, task.id);
    assert_eq!(back.status(), TaskStatus::Queued);
    assert_eq!(back.history(), &[TaskStatus::Pending, TaskStatus::Queued]);
    assert!(back.dependencies().contains(&dep));
    assert_eq!(back.required_type, Some(AgentType::Programming));
    assert_eq!(back.input["grammar"], "ebnf");
}

#[test]
fn deserialized_task_drops_self_dependency() {
    let other = Uuid::new_v4();
    let task = Task::new("Loop", "depends on itself on the wire");
    let mut value = serde_json::to_value(&task).unwrap();
    value["dependencies"] = serde_json::json!([task.id, other]);

    let back: Task = serde_json::from_value(value).unwrap();
    assert!(!back.dependencies().contains(&task.id));
    assert!(back.dependencies().contains(&other));
    assert_eq!(back.dependencies().len(), 1);
}

// ---------------------------------------------------------------------------
// 2. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let err = CohortError::InvalidTransition {
        from: TaskStatus::Completed,
        to: TaskStatus::Pending,
    };
    assert_eq!(
        err.to_string(),
        "Invalid task transition: completed -> pending"
    );

    assert_eq!(CohortError::NoAgents.to_string(), "No agents available");
    assert_eq!(
        CohortError::Stalled("2 tasks stuck".into()).to_string(),
        "Crew stalled: 2 tasks stuck"
    );
    assert_eq!(
        CohortError::Consensus("finalized".into()).to_string(),
        "Consensus error: finalized"
    );

    let bad_json = serde_json::from_str::<serde_json::Value>("not json");
    let err: CohortError = bad_json.unwrap_err().into();
    assert!(err.to_string().starts_with("JSON error:"));

    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: CohortError = io_err.into();
    assert!(err.to_string().starts_with("IO error:"));
}

// ---------------------------------------------------------------------------
// 3. Agent queue ownership: tasks move in and out, metrics accumulate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn agent_worker_contract() {
    let agent = Agent::new(
        "writer",
        AgentCapabilities::new(AgentType::Documentation),
        Arc::new(Noop),
    )
    .with_concurrency_limit(2);

    assert!(agent.is_available());
    assert!(agent.add_task(Task::new("Guide", "").with_priority(TaskPriority::Low)));
    assert!(agent.add_task(Task::new("Changelog", "").with_priority(TaskPriority::High)));
    assert!(!agent.add_task(Task::new("Overflow", "")));

    let next = agent.get_next_task().unwrap();
    assert_eq!(next.title, "Changelog");
    agent.execute_task(&next).await.unwrap();
    agent.record_task_completion(true, Duration::from_millis(20));

    let snap = agent.snapshot();
    assert_eq!(snap.queue_len, 1);
    assert_eq!(snap.status, AgentStatus::Idle);
    assert_eq!(snap.metrics.tasks_completed, 1);
    assert_eq!(snap.agent_type, AgentType::Documentation);
}

// ---------------------------------------------------------------------------
// 4. Enum wire names are lowercase / snake_case
// ---------------------------------------------------------------------------

#[test]
fn enum_serialization_names() {
    assert_eq!(
        serde_json::to_string(&TaskPriority::Background).unwrap(),
        "\"background\""
    );
    assert_eq!(
        serde_json::to_string(&AgentStatus::Stopped).unwrap(),
        "\"stopped\""
    );
    assert_eq!(
        serde_json::to_string(&AgentType::Management).unwrap(),
        "\"management\""
    );
    let bad: Result<TaskStatus, _> = serde_json::from_str("\"exploded\"");
    assert!(bad.is_err());
}
