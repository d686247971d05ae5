use crate::strategy::CrewStrategy;
use cohort_core::{AgentId, Task, TaskId, TaskOutput, TaskStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the crew is in its run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewPhase {
    #[default]
    Idle,
    Planning,
    Iterating,
    Finalizing,
}

impl std::fmt::Display for CrewPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrewPhase::Idle => write!(f, "idle"),
            CrewPhase::Planning => write!(f, "planning"),
            CrewPhase::Iterating => write!(f, "iterating"),
            CrewPhase::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Overall verdict of a crew run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewRunStatus {
    /// Every subtask completed (and the completion vote passed, if required).
    Completed,
    /// The run ended with failed, blocked or unfinished subtasks.
    CompletedWithErrors,
}

/// Final state of one subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub output: TaskOutput,
}

impl From<&Task> for TaskReport {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            status: task.status(),
            assigned_agent: task.assigned_agent,
            retry_count: task.retry_count,
            error: task.error.clone(),
            output: task.output.clone(),
        }
    }
}

/// Aggregate outcome of [`Crew::run`](crate::Crew::run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewRunResult {
    pub run_id: Uuid,
    pub goal: String,
    pub status: CrewRunStatus,
    /// Label of the decomposition the crew executed.
    pub decomposition: Option<String>,
    /// Strategy in force when the run ended.
    pub strategy: CrewStrategy,
    pub total_tasks: usize,
    pub completed: usize,
    /// Permanently failed, timed out or cancelled.
    pub failed: usize,
    /// Pending behind a dependency that can no longer complete.
    pub blocked: usize,
    /// Neither finished nor blocked, e.g. when the iteration cap was hit.
    pub unfinished: usize,
    pub iterations: usize,
    /// Decisions recorded during this run.
    pub decisions: usize,
    /// Whether auto-recovery had to run.
    pub recovered: bool,
    pub completion_confirmed: bool,
    pub elapsed_ms: u64,
    pub tasks: Vec<TaskReport>,
}

impl CrewRunResult {
    pub fn is_success(&self) -> bool {
        self.status == CrewRunStatus::Completed
    }
}
