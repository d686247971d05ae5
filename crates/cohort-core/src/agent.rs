use crate::task::{Task, TaskId};
use crate::tool::{TaskExecutor, TaskOutput};
use crate::CohortResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of an [`Agent`].
pub type AgentId = Uuid;

/// Broad specialisation of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Programming,
    Research,
    Design,
    Testing,
    Documentation,
    Analysis,
    Management,
    General,
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentType::Programming => "programming",
            AgentType::Research => "research",
            AgentType::Design => "design",
            AgentType::Testing => "testing",
            AgentType::Documentation => "documentation",
            AgentType::Analysis => "analysis",
            AgentType::Management => "management",
            AgentType::General => "general",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "programming" => Ok(AgentType::Programming),
            "research" => Ok(AgentType::Research),
            "design" => Ok(AgentType::Design),
            "testing" => Ok(AgentType::Testing),
            "documentation" => Ok(AgentType::Documentation),
            "analysis" => Ok(AgentType::Analysis),
            "management" => Ok(AgentType::Management),
            "general" => Ok(AgentType::General),
            other => Err(format!("Unknown agent type: {other}")),
        }
    }
}

/// What an agent is and what it can do. Replaces per-specialisation agent types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub agent_type: AgentType,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl AgentCapabilities {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// True when every required capability is held.
    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    /// Queue is at `concurrency_limit`.
    Busy,
    Working,
    Paused,
    /// Unavailable until [`Agent::reset`].
    Error,
    /// Unavailable until [`Agent::reset`].
    Stopped,
}

impl AgentStatus {
    /// Health predicate used by the orchestrator's monitor.
    pub fn is_healthy(self) -> bool {
        !matches!(self, AgentStatus::Error | AgentStatus::Stopped)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Working => "working",
            AgentStatus::Paused => "paused",
            AgentStatus::Error => "error",
            AgentStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Rolling per-agent metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
}

impl AgentMetrics {
    /// Fold one finished task into the running totals.
    pub fn record(&mut self, success: bool, elapsed: Duration) {
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let total = self.tasks_completed + self.tasks_failed;
        self.success_rate = self.tasks_completed as f64 / total as f64;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.average_response_time_ms +=
            (elapsed_ms - self.average_response_time_ms) / total as f64;
    }

    pub fn total_tasks(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }
}

/// Serializable point-in-time view of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub name: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub queue_len: usize,
    pub concurrency_limit: usize,
    pub active_task: Option<TaskId>,
    pub metrics: AgentMetrics,
}

struct AgentState {
    status: AgentStatus,
    queue: Vec<Task>,
    active_task: Option<TaskId>,
    metrics: AgentMetrics,
    last_error: Option<String>,
}

/// A worker: a capability set, a bounded task queue it exclusively owns, and a
/// pluggable [`TaskExecutor`] that does the actual work.
///
/// Mutable state sits behind a `parking_lot::Mutex` that is never held across
/// an `.await`, so an `Arc<Agent>` can be shared freely between the
/// orchestrator's loops.
pub struct Agent {
    id: AgentId,
    name: String,
    capabilities: AgentCapabilities,
    concurrency_limit: usize,
    executor: Arc<dyn TaskExecutor>,
    state: Mutex<AgentState>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an idle agent with a concurrency limit of 1.
    pub fn new(
        name: impl Into<String>,
        capabilities: AgentCapabilities,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            capabilities,
            concurrency_limit: 1,
            executor,
            state: Mutex::new(AgentState {
                status: AgentStatus::Idle,
                queue: Vec::new(),
                active_task: None,
                metrics: AgentMetrics::default(),
                last_error: None,
            }),
        }
    }

    /// Set the queue bound. Values below 1 are raised to 1.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &AgentCapabilities {
        &self.capabilities
    }

    pub fn agent_type(&self) -> AgentType {
        self.capabilities.agent_type
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    /// Idle and below the queue bound.
    pub fn is_available(&self) -> bool {
        let state = self.state.lock();
        state.status == AgentStatus::Idle && state.queue.len() < self.concurrency_limit
    }

    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn has_active_task(&self) -> bool {
        self.state.lock().active_task.is_some()
    }

    pub fn active_task(&self) -> Option<TaskId> {
        self.state.lock().active_task
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.state.lock().metrics.clone()
    }

    /// Clones of the tasks waiting in this agent's queue.
    pub fn queued_tasks(&self) -> Vec<Task> {
        self.state.lock().queue.clone()
    }

    /// Enqueue a task. Returns `false` when the queue is full or the agent is
    /// paused, errored or stopped.
    pub fn add_task(&self, task: Task) -> bool {
        self.try_add_task(task).is_ok()
    }

    /// Like [`Agent::add_task`] but hands the task back on rejection.
    pub fn try_add_task(&self, task: Task) -> Result<(), Task> {
        let mut state = self.state.lock();
        if state.queue.len() >= self.concurrency_limit
            || matches!(
                state.status,
                AgentStatus::Paused | AgentStatus::Error | AgentStatus::Stopped
            )
        {
            return Err(task);
        }
        state.queue.push(task);
        if state.queue.len() >= self.concurrency_limit && state.status == AgentStatus::Idle {
            state.status = AgentStatus::Busy;
        }
        Ok(())
    }

    /// Pop the highest-priority queued task (earliest created on ties).
    pub fn get_next_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        let task = Self::pop_next(&mut state)?;
        if state.status == AgentStatus::Busy {
            state.status = AgentStatus::Idle;
        }
        Some(task)
    }

    /// Pop the next task and mark it active in one step, so the agent never
    /// looks available between dequeue and execution. Undo with
    /// [`Agent::release_claim`] if the task will not run.
    pub fn claim_next_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        let task = Self::pop_next(&mut state)?;
        state.active_task = Some(task.id);
        if matches!(state.status, AgentStatus::Idle | AgentStatus::Busy) {
            state.status = AgentStatus::Working;
        }
        Some(task)
    }

    /// Drop a claim taken with [`Agent::claim_next_task`].
    pub fn release_claim(&self) {
        let mut state = self.state.lock();
        state.active_task = None;
        if state.status == AgentStatus::Working {
            state.status = self.settled_status(&state);
        }
    }

    fn pop_next(state: &mut AgentState) -> Option<Task> {
        let idx = state
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| t.schedule_key())
            .map(|(i, _)| i)?;
        Some(state.queue.remove(idx))
    }

    /// Take a specific task back out of the queue (used for cancellation).
    pub fn remove_task(&self, task_id: TaskId) -> Option<Task> {
        let mut state = self.state.lock();
        let idx = state.queue.iter().position(|t| t.id == task_id)?;
        let task = state.queue.remove(idx);
        if state.status == AgentStatus::Busy {
            state.status = AgentStatus::Idle;
        }
        Some(task)
    }

    /// Run a task through this agent's executor.
    ///
    /// The agent is `Working` for the duration of the call and returns to
    /// `Idle` (or `Busy`) afterwards, even if the executor panics. Errors are
    /// returned to the caller untouched; catching them is the orchestrator's job.
    pub async fn execute_task(&self, task: &Task) -> CohortResult<TaskOutput> {
        let _guard = ExecutionGuard::enter(self, task.id);
        self.executor.execute(task).await
    }

    /// Fold a finished task into the rolling metrics.
    pub fn record_task_completion(&self, success: bool, elapsed: Duration) {
        self.state.lock().metrics.record(success, elapsed);
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.status.is_healthy() {
            state.status = AgentStatus::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.status == AgentStatus::Paused {
            state.status = self.settled_status(&state);
        }
    }

    /// Put the agent into `Error`; it stays unavailable until [`Agent::reset`].
    pub fn mark_error(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        state.status = AgentStatus::Error;
        state.last_error = Some(reason.into());
    }

    pub fn stop(&self) {
        self.state.lock().status = AgentStatus::Stopped;
    }

    /// External reset out of `Error`/`Stopped`.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_error = None;
        state.status = self.settled_status(&state);
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let state = self.state.lock();
        AgentSnapshot {
            id: self.id,
            name: self.name.clone(),
            agent_type: self.capabilities.agent_type,
            status: state.status,
            queue_len: state.queue.len(),
            concurrency_limit: self.concurrency_limit,
            active_task: state.active_task,
            metrics: state.metrics.clone(),
        }
    }

    fn settled_status(&self, state: &AgentState) -> AgentStatus {
        if state.active_task.is_some() {
            AgentStatus::Working
        } else if state.queue.len() >= self.concurrency_limit {
            AgentStatus::Busy
        } else {
            AgentStatus::Idle
        }
    }
}

/// Marks the agent `Working` on creation and settles it again on drop, so a
/// panicking executor cannot leave the agent stuck.
struct ExecutionGuard<'a> {
    agent: &'a Agent,
}

impl<'a> ExecutionGuard<'a> {
    fn enter(agent: &'a Agent, task_id: TaskId) -> Self {
        let mut state = agent.state.lock();
        state.active_task = Some(task_id);
        if matches!(state.status, AgentStatus::Idle | AgentStatus::Busy) {
            state.status = AgentStatus::Working;
        }
        drop(state);
        Self { agent }
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.agent.release_claim();
    }
}
