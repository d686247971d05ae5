use crate::agent::{AgentId, AgentType};
use crate::{CohortError, CohortResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// Identifier of a [`Task`].
pub type TaskId = Uuid;

/// Scheduling priority. `Critical` is served first, `Background` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Background,
}

impl TaskPriority {
    /// Sort rank: lower ranks are scheduled earlier.
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
            TaskPriority::Background => 4,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Background => write!(f, "background"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            "background" => Ok(TaskPriority::Background),
            other => Err(format!(
                "Unknown priority: {other}. Valid: critical, high, medium, low, background"
            )),
        }
    }
}

/// Status of a task. See [`TaskStatus::can_transition_to`] for the allowed edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    InProgress,
    Paused,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// The `-> Pending` edges out of `Queued`, `Assigned` and `InProgress` exist
    /// for failed assignments and for recovery of stuck tasks; `Failed -> Pending`
    /// is the retry edge.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Queued | Cancelled | Timeout)
                | (Queued, Assigned | Pending | Cancelled | Timeout)
                | (Assigned, InProgress | Pending | Cancelled)
                | (
                    InProgress,
                    Completed | Failed | Timeout | Cancelled | Paused | Pending
                )
                | (Paused, InProgress | Cancelled)
                | (Failed, Pending)
        )
    }

    /// `Completed`, `Timeout` and `Cancelled` never change again. `Failed` is
    /// terminal only once retries are exhausted, which the task tracks.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    /// Check that a recorded status sequence is a walk through the state graph
    /// starting at `Pending`.
    pub fn is_valid_path(path: &[TaskStatus]) -> bool {
        match path.first() {
            Some(TaskStatus::Pending) => path.windows(2).all(|w| w[0].can_transition_to(w[1])),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// What happened after a failure was recorded on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The task went back to `Pending` with an incremented retry count.
    Retrying { attempt: u32 },
    /// Retries are exhausted; the task stays `Failed` for good.
    Exhausted,
}

/// A unit of work.
///
/// Deserialisation drops a self-reference from the dependency set, the same
/// way [`Task::with_dependencies`] does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub output: serde_json::Map<String, serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    dependencies: BTreeSet<TaskId>,
    /// Agent currently holding the task. Lookup only; the agent owns the queue.
    pub assigned_agent: Option<AgentId>,
    /// Agent type the task prefers (used by the specialized strategy).
    pub required_type: Option<AgentType>,
    /// Named capabilities an agent must hold to be considered at all.
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    /// Parent task ID if this is a subtask produced by decomposition.
    #[serde(default)]
    pub parent_task: Option<TaskId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    history: Vec<TaskStatus>,
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Task::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut task = Task::deserialize(deserializer)?;
        let id = task.id;
        task.dependencies.remove(&id);
        Ok(task)
    }
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            input: serde_json::Map::new(),
            output: serde_json::Map::new(),
            error: None,
            retry_count: 0,
            max_retries: 3,
            dependencies: BTreeSet::new(),
            assigned_agent: None,
            required_type: None,
            required_capabilities: BTreeSet::new(),
            parent_task: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            history: vec![TaskStatus::Pending],
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_required_type(mut self, agent_type: AgentType) -> Self {
        self.required_type = Some(agent_type);
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_task = Some(parent);
        self
    }

    /// Set the dependency set. A self-reference is dropped silently.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        let id = self.id;
        self.dependencies = deps.into_iter().filter(|d| *d != id).collect();
        self
    }

    /// Add one dependency, rejecting a self-reference.
    pub fn add_dependency(&mut self, dep: TaskId) -> CohortResult<()> {
        if dep == self.id {
            return Err(CohortError::SelfDependency(self.id));
        }
        self.dependencies.insert(dep);
        Ok(())
    }

    pub fn remove_dependency(&mut self, dep: &TaskId) -> bool {
        self.dependencies.remove(dep)
    }

    pub fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.dependencies
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Every status this task has held, oldest first.
    pub fn history(&self) -> &[TaskStatus] {
        &self.history
    }

    /// Move to `next`, enforcing the state machine and stamping timestamps.
    pub fn transition(&mut self, next: TaskStatus) -> CohortResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CohortError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            TaskStatus::InProgress if self.status == TaskStatus::Assigned => {
                self.started_at = Some(now);
            }
            TaskStatus::Completed
            | TaskStatus::Failed
            | TaskStatus::Timeout
            | TaskStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            TaskStatus::Pending => {
                self.started_at = None;
                self.completed_at = None;
                self.assigned_agent = None;
            }
            _ => {}
        }
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    /// Mark the task completed with the executor's output.
    pub fn complete(
        &mut self,
        output: serde_json::Map<String, serde_json::Value>,
    ) -> CohortResult<()> {
        self.transition(TaskStatus::Completed)?;
        self.output = output;
        self.error = None;
        Ok(())
    }

    /// Record a failed attempt and apply the retry rule: back to `Pending`
    /// while `retry_count < max_retries`, otherwise stay `Failed`.
    ///
    /// Retries are immediate; there is no backoff at the task level.
    pub fn record_failure(&mut self, error: impl Into<String>) -> CohortResult<FailureOutcome> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        self.retry_failed()
    }

    /// Requeue a `Failed` task if it still has retries left.
    pub fn retry_failed(&mut self) -> CohortResult<FailureOutcome> {
        if self.status != TaskStatus::Failed || self.retry_count >= self.max_retries {
            return Ok(FailureOutcome::Exhausted);
        }
        self.transition(TaskStatus::Pending)?;
        self.retry_count += 1;
        Ok(FailureOutcome::Retrying {
            attempt: self.retry_count,
        })
    }

    /// Whether the task failed and may still be retried.
    pub fn is_retryable(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// True when every dependency is in `completed` and the task is pending.
    pub fn is_ready(&self, completed: &HashSet<TaskId>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }

    /// Wall-clock time since the task entered `InProgress`.
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|s| now - s)
    }

    /// Scheduling key: priority rank first, then creation time.
    pub fn schedule_key(&self) -> (u8, DateTime<Utc>) {
        (self.priority.rank(), self.created_at)
    }
}
