use crate::assignment::{
    compatible_candidates, rotated, AssignmentStrategy, LoadScorer, WeightedLoadScorer,
};
use crate::config::OrchestratorConfig;
use crate::monitor::{HealthMonitor, HealthReport};
use crate::task_queue::TaskQueue;
use crate::types::{AgentSummary, StatusSnapshot, TaskSummary};
use chrono::Utc;
use cohort_core::{
    Agent, AgentId, AgentStatus, CohortError, CohortResult, FailureOutcome, Task, TaskId,
    TaskOutput, TaskStatus,
};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Registries owned by one orchestrator. Nothing here is global, so several
/// orchestrators can live in the same process.
#[derive(Default)]
struct OrchestratorState {
    /// Registration order; ties in every strategy follow it.
    agents: Vec<Arc<Agent>>,
    pending: TaskQueue,
    active: HashMap<TaskId, Task>,
    completed: Vec<Task>,
    failed: Vec<Task>,
    cancelled: Vec<Task>,
    rr_cursor: usize,
}

impl OrchestratorState {
    fn agent(&self, id: AgentId) -> Option<&Arc<Agent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    /// Try to hand a pending task to an agent.
    ///
    /// On success the task sits `Assigned` in the agent's queue. On failure it
    /// is handed back `Pending` so the caller can keep it for the next pass.
    fn assign(
        &mut self,
        mut task: Task,
        strategy: AssignmentStrategy,
        scorer: &dyn LoadScorer,
    ) -> Result<Arc<Agent>, Task> {
        if let Err(e) = task.transition(TaskStatus::Queued) {
            warn!(task_id = %task.id, error = %e, "Task cannot be queued for assignment");
            return Err(task);
        }

        let ordered = match strategy {
            AssignmentStrategy::RoundRobin => rotated(&self.agents, self.rr_cursor),
            _ => self.agents.clone(),
        };
        let candidates = compatible_candidates(&task, &ordered);
        let Some(agent) = strategy.select(&task, &candidates, scorer).cloned() else {
            revert_to_pending(&mut task);
            return Err(task);
        };

        if let Err(e) = task.transition(TaskStatus::Assigned) {
            warn!(task_id = %task.id, error = %e, "Task cannot be assigned");
            revert_to_pending(&mut task);
            return Err(task);
        }
        task.assigned_agent = Some(agent.id());
        let task_id = task.id;

        match agent.try_add_task(task) {
            Ok(()) => {
                if strategy == AssignmentStrategy::RoundRobin {
                    if let Some(pos) = self.agents.iter().position(|a| a.id() == agent.id()) {
                        self.rr_cursor = pos + 1;
                    }
                }
                debug!(task_id = %task_id, agent = %agent.name(), %strategy, "Task assigned");
                Ok(agent)
            }
            Err(mut task) => {
                revert_to_pending(&mut task);
                Err(task)
            }
        }
    }

    fn find_task(&self, id: TaskId) -> Option<Task> {
        if let Some(task) = self.pending.get(id) {
            return Some(task.clone());
        }
        if let Some(task) = self.active.get(&id) {
            return Some(task.clone());
        }
        for agent in &self.agents {
            if let Some(task) = agent.queued_tasks().into_iter().find(|t| t.id == id) {
                return Some(task);
            }
        }
        self.completed
            .iter()
            .chain(self.failed.iter())
            .chain(self.cancelled.iter())
            .find(|t| t.id == id)
            .cloned()
    }

    /// Fold one execution result into the task lists, applying the retry rule.
    fn settle(
        &mut self,
        mut task: Task,
        agent: &Agent,
        result: CohortResult<TaskOutput>,
        elapsed: Duration,
    ) {
        let task_id = task.id;
        match result {
            Ok(output) => match task.complete(output) {
                Ok(()) => {
                    info!(
                        task_id = %task_id,
                        agent = %agent.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Task completed"
                    );
                    self.completed.push(task);
                }
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Completed task in unexpected state");
                    self.failed.push(task);
                }
            },
            Err(err) => match task.record_failure(err.to_string()) {
                Ok(FailureOutcome::Retrying { attempt }) => {
                    warn!(
                        task_id = %task_id,
                        agent = %agent.name(),
                        attempt,
                        max_retries = task.max_retries,
                        error = %err,
                        "Task failed, retrying"
                    );
                    self.pending.push(task);
                }
                Ok(FailureOutcome::Exhausted) => {
                    error!(
                        task_id = %task_id,
                        agent = %agent.name(),
                        retries = task.retry_count,
                        error = %err,
                        "Task failed permanently"
                    );
                    self.failed.push(task);
                }
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Failed task in unexpected state");
                    self.failed.push(task);
                }
            },
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        let mut agents = AgentSummary::default();
        let mut queued = 0;
        for agent in &self.agents {
            agents.total += 1;
            if agent.is_available() {
                agents.available += 1;
            }
            *agents.by_type.entry(agent.agent_type()).or_default() += 1;
            queued += agent.queue_len();
        }
        StatusSnapshot {
            agents,
            tasks: TaskSummary {
                pending: self.pending.len(),
                queued,
                active: self.active.len(),
                completed: self.completed.len(),
                failed: self.failed.len(),
                cancelled: self.cancelled.len(),
            },
        }
    }
}

fn revert_to_pending(task: &mut Task) {
    if let Err(e) = task.transition(TaskStatus::Pending) {
        warn!(task_id = %task.id, error = %e, "Could not return task to pending");
    }
}

struct Inner {
    config: OrchestratorConfig,
    scorer: Arc<dyn LoadScorer>,
    state: RwLock<OrchestratorState>,
    monitor: parking_lot::Mutex<HealthMonitor>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
    agent_loops: parking_lot::Mutex<HashMap<AgentId, JoinHandle<()>>>,
}

/// Owns the agent registry and task lists and drives them with a
/// distribution loop, one execution loop per agent and a health monitor.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_scorer(config, Arc::new(WeightedLoadScorer::default()))
    }

    /// Use a custom load scorer for [`AssignmentStrategy::LoadBalanced`].
    pub fn with_scorer(config: OrchestratorConfig, scorer: Arc<dyn LoadScorer>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                scorer,
                state: RwLock::new(OrchestratorState::default()),
                monitor: parking_lot::Mutex::new(HealthMonitor::new()),
                shutdown,
                running: AtomicBool::new(false),
                agent_loops: parking_lot::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Add an agent. While [`Orchestrator::run`] is active it gets its own
    /// execution loop immediately.
    pub async fn register_agent(&self, agent: Arc<Agent>) -> AgentId {
        let id = agent.id();
        {
            let mut state = self.inner.state.write().await;
            if state.agent(id).is_some() {
                return id;
            }
            info!(agent = %agent.name(), agent_type = %agent.agent_type(), "Agent registered");
            state.agents.push(agent);
        }
        if self.is_running() {
            self.spawn_agent_loop(id);
        }
        id
    }

    /// Remove an agent. Tasks still waiting in its queue go back to pending;
    /// a task it is executing right now finishes normally.
    pub async fn unregister_agent(&self, agent_id: AgentId) -> Option<Arc<Agent>> {
        let mut state = self.inner.state.write().await;
        let idx = state.agents.iter().position(|a| a.id() == agent_id)?;
        let agent = state.agents.remove(idx);

        let mut requeued = 0;
        while let Some(mut task) = agent.get_next_task() {
            revert_to_pending(&mut task);
            state.pending.push(task);
            requeued += 1;
        }
        info!(agent = %agent.name(), requeued, "Agent unregistered");
        Some(agent)
    }

    pub async fn agent(&self, agent_id: AgentId) -> Option<Arc<Agent>> {
        self.inner.state.read().await.agent(agent_id).cloned()
    }

    /// Registered agents in registration order.
    pub async fn agents(&self) -> Vec<Arc<Agent>> {
        self.inner.state.read().await.agents.clone()
    }

    /// Queue a `Pending` task for distribution.
    pub async fn submit_task(&self, task: Task) -> CohortResult<TaskId> {
        if task.status() != TaskStatus::Pending {
            return Err(CohortError::Task(format!(
                "Task {} must be pending to be submitted, found {}",
                task.id,
                task.status()
            )));
        }
        info!(task_id = %task.id, title = %task.title, priority = %task.priority, "Task submitted");
        Ok(self.inner.state.write().await.pending.push(task))
    }

    /// Assign a `Pending` task right away with the configured strategy.
    ///
    /// Returns `None` when no compatible agent is available; the task is then
    /// kept in the pending list for the next distribution pass.
    pub async fn assign_task(&self, task: Task) -> CohortResult<Option<Arc<Agent>>> {
        if task.status() != TaskStatus::Pending {
            return Err(CohortError::Task(format!(
                "Task {} must be pending to be assigned, found {}",
                task.id,
                task.status()
            )));
        }
        let strategy = self.inner.config.assignment_strategy;
        let mut state = self.inner.state.write().await;
        match state.assign(task, strategy, self.inner.scorer.as_ref()) {
            Ok(agent) => Ok(Some(agent)),
            Err(task) => {
                state.pending.push(task);
                Ok(None)
            }
        }
    }

    /// One distribution pass: expire overdue pending tasks, then try to assign
    /// every pending task in `(priority, created_at)` order. Returns the number
    /// of tasks assigned.
    pub async fn distribute_once(&self) -> usize {
        let strategy = self.inner.config.assignment_strategy;
        let mut state = self.inner.state.write().await;

        for mut task in state.pending.take_overdue(Utc::now()) {
            match task.transition(TaskStatus::Timeout) {
                Ok(()) => warn!(task_id = %task.id, title = %task.title, "Task deadline passed before assignment"),
                Err(e) => warn!(task_id = %task.id, error = %e, "Could not time out task"),
            }
            state.failed.push(task);
        }

        let mut assigned = 0;
        let mut waiting = Vec::new();
        for task in state.pending.drain_in_schedule_order() {
            match state.assign(task, strategy, self.inner.scorer.as_ref()) {
                Ok(_) => assigned += 1,
                Err(task) => waiting.push(task),
            }
        }
        state.pending.extend(waiting);
        assigned
    }

    /// Execute the next task in one agent's queue. Returns the id of the task
    /// that ran, or `None` if the agent had nothing to do.
    ///
    /// Executor errors and panics are caught here and become a `Failed`
    /// transition; they never propagate to the caller.
    pub async fn process_agent_once(&self, agent_id: AgentId) -> CohortResult<Option<TaskId>> {
        let (agent, task) = {
            let mut state = self.inner.state.write().await;
            let agent = state
                .agent(agent_id)
                .cloned()
                .ok_or_else(|| CohortError::Orchestrator(format!("Unknown agent: {agent_id}")))?;
            if matches!(
                agent.status(),
                AgentStatus::Paused | AgentStatus::Error | AgentStatus::Stopped
            ) {
                return Ok(None);
            }
            let Some(mut task) = agent.claim_next_task() else {
                return Ok(None);
            };
            if let Err(e) = task.transition(TaskStatus::InProgress) {
                agent.release_claim();
                error!(task_id = %task.id, error = %e, "Queued task cannot start");
                let id = task.id;
                state.failed.push(task);
                return Ok(Some(id));
            }
            state.active.insert(task.id, task.clone());
            (agent, task)
        };

        let task_id = task.id;
        info!(task_id = %task_id, agent = %agent.name(), title = %task.title, "Task started");

        let started = Instant::now();
        let runner = Arc::clone(&agent);
        let work = task.clone();
        let result = match tokio::spawn(async move { runner.execute_task(&work).await }).await {
            Ok(result) => result,
            Err(join_err) => Err(CohortError::Agent(format!("executor panicked: {join_err}"))),
        };
        let elapsed = started.elapsed();
        agent.record_task_completion(result.is_ok(), elapsed);

        let mut state = self.inner.state.write().await;
        state.active.remove(&task_id);
        state.settle(task, &agent, result, elapsed);
        Ok(Some(task_id))
    }

    /// One distribution pass followed by one execution pass over every agent,
    /// with agents running concurrently. Returns the number of tasks executed.
    pub async fn step(&self) -> usize {
        self.distribute_once().await;
        let ids: Vec<AgentId> = self.agents().await.iter().map(|a| a.id()).collect();
        join_all(ids.into_iter().map(|id| self.process_agent_once(id)))
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count()
    }

    /// Cancel a task that has not started yet.
    ///
    /// Returns `Ok(false)` if the task is unknown or already finished, and an
    /// error if it is executing; in-flight work is never preempted.
    pub async fn cancel_task(&self, task_id: TaskId) -> CohortResult<bool> {
        let mut state = self.inner.state.write().await;

        let mut task = match state.pending.remove(task_id) {
            Some(task) => task,
            None => {
                if state.active.contains_key(&task_id) {
                    return Err(CohortError::Orchestrator(format!(
                        "Task {task_id} is in progress and cannot be cancelled"
                    )));
                }
                match state.agents.iter().find_map(|a| a.remove_task(task_id)) {
                    Some(task) => task,
                    None => return Ok(false),
                }
            }
        };

        task.transition(TaskStatus::Cancelled)?;
        info!(task_id = %task_id, title = %task.title, "Task cancelled");
        state.cancelled.push(task);
        Ok(true)
    }

    /// Look a task up in every list and agent queue.
    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.inner.state.read().await.find_task(task_id)
    }

    pub async fn get_status(&self) -> StatusSnapshot {
        self.inner.state.read().await.snapshot()
    }

    pub async fn completed_tasks(&self) -> Vec<Task> {
        self.inner.state.read().await.completed.clone()
    }

    /// Permanently failed and timed-out tasks.
    pub async fn failed_tasks(&self) -> Vec<Task> {
        self.inner.state.read().await.failed.clone()
    }

    /// Run one health sweep over all registered agents.
    pub async fn check_health(&self) -> HealthReport {
        let agents = self.agents().await;
        self.inner.monitor.lock().check(&agents)
    }

    /// Run the distribution, health and per-agent loops until
    /// [`Orchestrator::stop`] is called. In-flight executions finish before
    /// this returns.
    pub async fn run(&self) -> CohortResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(CohortError::Orchestrator(
                "Orchestrator is already running".to_string(),
            ));
        }
        info!(
            strategy = %self.inner.config.assignment_strategy,
            distribution_interval_ms = self.inner.config.distribution_interval_ms,
            "Orchestrator started"
        );

        let mut loops = vec![
            tokio::spawn(self.clone().distribution_loop()),
            tokio::spawn(self.clone().health_loop()),
        ];
        for agent in self.agents().await {
            self.spawn_agent_loop(agent.id());
        }

        let mut shutdown = self.inner.shutdown.subscribe();
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        // Shutdown is set, so no new agent loop can be spawned past this point.
        loops.extend(
            std::mem::take(&mut *self.inner.agent_loops.lock()).into_values(),
        );
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Orchestrator loop ended abnormally");
            }
        }

        {
            let _loops = self.inner.agent_loops.lock();
            self.inner.running.store(false, Ordering::SeqCst);
            self.inner.shutdown.send_replace(false);
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Signal every loop to exit at its next check. A stop issued before
    /// `run` makes the next `run` return immediately.
    pub fn stop(&self) {
        self.inner.shutdown.send_replace(true);
    }

    fn spawn_agent_loop(&self, agent_id: AgentId) {
        let mut loops = self.inner.agent_loops.lock();
        if *self.inner.shutdown.borrow() || !self.is_running() || loops.contains_key(&agent_id) {
            return;
        }
        let handle = tokio::spawn(self.clone().agent_loop(agent_id));
        loops.insert(agent_id, handle);
    }

    async fn distribution_loop(self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let interval = self.inner.config.distribution_interval();
        while !*shutdown.borrow() {
            let assigned = self.distribute_once().await;
            if assigned > 0 {
                debug!(assigned, "Distribution pass");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn health_loop(self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let interval = self.inner.config.health_check_interval();
        while !*shutdown.borrow() {
            let report = self.check_health().await;
            if !report.all_healthy() {
                warn!(
                    healthy = report.healthy,
                    degraded = report.degraded.len(),
                    "Health check found degraded agents"
                );
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn agent_loop(self, agent_id: AgentId) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let poll = self.inner.config.agent_poll_interval();
        while !*shutdown.borrow() {
            match self.process_agent_once(agent_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(_) => {
                    debug!(agent_id = %agent_id, "Agent gone, execution loop exiting");
                    self.inner.agent_loops.lock().remove(&agent_id);
                    return;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cohort_core::{AgentCapabilities, AgentType, TaskExecutor, TaskPriority};

    struct Succeed;

    #[async_trait]
    impl TaskExecutor for Succeed {
        async fn execute(&self, task: &Task) -> CohortResult<TaskOutput> {
            let mut out = TaskOutput::new();
            out.insert("done".into(), serde_json::json!(task.title));
            Ok(out)
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl TaskExecutor for AlwaysFail {
        async fn execute(&self, _task: &Task) -> CohortResult<TaskOutput> {
            Err(CohortError::Agent("boom".into()))
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskExecutor for Panics {
        async fn execute(&self, _task: &Task) -> CohortResult<TaskOutput> {
            panic!("executor bug");
        }
    }

    fn agent(name: &str, executor: Arc<dyn TaskExecutor>) -> Arc<Agent> {
        Arc::new(Agent::new(
            name,
            AgentCapabilities::new(AgentType::Programming),
            executor,
        ))
    }

    #[tokio::test]
    async fn test_submit_and_step_completes() {
        let orch = Orchestrator::default();
        orch.register_agent(agent("coder", Arc::new(Succeed))).await;
        let id = orch.submit_task(Task::new("Build", "")).await.unwrap();

        assert_eq!(orch.step().await, 1);

        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.output["done"], "Build");
        assert_eq!(
            task.history(),
            &[
                TaskStatus::Pending,
                TaskStatus::Queued,
                TaskStatus::Assigned,
                TaskStatus::InProgress,
                TaskStatus::Completed
            ]
        );
        assert!(task.assigned_agent.is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_non_pending() {
        let orch = Orchestrator::default();
        let mut task = Task::new("t", "");
        task.transition(TaskStatus::Cancelled).unwrap();
        assert!(orch.submit_task(task).await.is_err());
    }

    #[tokio::test]
    async fn test_assign_without_agents_keeps_task_pending() {
        let orch = Orchestrator::default();
        let task = Task::new("Lonely", "");
        let id = task.id;
        assert!(orch.assign_task(task).await.unwrap().is_none());

        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(
            task.history(),
            &[TaskStatus::Pending, TaskStatus::Queued, TaskStatus::Pending]
        );
        assert_eq!(orch.get_status().await.tasks.pending, 1);
    }

    #[tokio::test]
    async fn test_capability_mismatch_is_not_assigned() {
        let orch = Orchestrator::default();
        orch.register_agent(agent("coder", Arc::new(Succeed))).await;
        orch.submit_task(Task::new("Deploy", "").with_capability("kubernetes"))
            .await
            .unwrap();
        assert_eq!(orch.distribute_once().await, 0);
        assert_eq!(orch.get_status().await.tasks.pending, 1);
    }

    #[tokio::test]
    async fn test_panicking_executor_becomes_failure() {
        let orch = Orchestrator::default();
        let worker = agent("flaky", Arc::new(Panics));
        let agent_id = orch.register_agent(Arc::clone(&worker)).await;
        let id = orch
            .submit_task(Task::new("Crash", "").with_max_retries(0))
            .await
            .unwrap();

        orch.distribute_once().await;
        assert_eq!(orch.process_agent_once(agent_id).await.unwrap(), Some(id));

        let failed = orch.failed_tasks().await;
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("panicked"));
        assert_eq!(worker.status(), AgentStatus::Idle);
        assert_eq!(worker.metrics().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_failure_is_retried_then_parked() {
        let orch = Orchestrator::default();
        orch.register_agent(agent("broken", Arc::new(AlwaysFail))).await;
        let id = orch
            .submit_task(Task::new("Never works", "").with_max_retries(1))
            .await
            .unwrap();

        assert_eq!(orch.step().await, 1);
        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.assigned_agent.is_none());

        assert_eq!(orch.step().await, 1);
        assert_eq!(orch.step().await, 0);
        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(orch.get_status().await.tasks.failed, 1);
    }

    #[tokio::test]
    async fn test_overdue_pending_task_times_out() {
        let orch = Orchestrator::default();
        let id = orch
            .submit_task(
                Task::new("Late", "").with_deadline(Utc::now() - chrono::Duration::seconds(1)),
            )
            .await
            .unwrap();
        orch.distribute_once().await;

        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Timeout);
        assert_eq!(orch.failed_tasks().await.len(), 1);
        assert_eq!(orch.get_status().await.tasks.pending, 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_and_queued() {
        let orch = Orchestrator::default();
        orch.register_agent(agent("coder", Arc::new(Succeed))).await;
        let queued = orch.submit_task(Task::new("Queued", "")).await.unwrap();
        orch.distribute_once().await;
        let pending = orch.submit_task(Task::new("Pending", "")).await.unwrap();

        assert!(orch.cancel_task(pending).await.unwrap());
        assert!(orch.cancel_task(queued).await.unwrap());
        assert!(!orch.cancel_task(queued).await.unwrap());

        let task = orch.get_task(queued).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);
        let status = orch.get_status().await;
        assert_eq!(status.tasks.cancelled, 2);
        assert!(status.is_idle());
    }

    #[tokio::test]
    async fn test_unregister_requeues_waiting_tasks() {
        let orch = Orchestrator::default();
        let id = orch.register_agent(agent("coder", Arc::new(Succeed))).await;
        let task_id = orch.submit_task(Task::new("Orphan", "")).await.unwrap();
        orch.distribute_once().await;
        assert_eq!(orch.get_status().await.tasks.queued, 1);

        assert!(orch.unregister_agent(id).await.is_some());
        assert!(orch.unregister_agent(id).await.is_none());
        assert!(orch.process_agent_once(id).await.is_err());

        let task = orch.get_task(task_id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(orch.get_status().await.tasks.pending, 1);
    }

    #[tokio::test]
    async fn test_paused_agent_does_not_execute() {
        let orch = Orchestrator::default();
        let worker = agent("coder", Arc::new(Succeed));
        let id = orch.register_agent(Arc::clone(&worker)).await;
        orch.submit_task(Task::new("Wait", "")).await.unwrap();
        orch.distribute_once().await;

        worker.pause();
        assert_eq!(orch.process_agent_once(id).await.unwrap(), None);
        worker.resume();
        assert!(orch.process_agent_once(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_status_by_type() {
        let orch = Orchestrator::default();
        orch.register_agent(agent("a", Arc::new(Succeed))).await;
        orch.register_agent(Arc::new(Agent::new(
            "w",
            AgentCapabilities::new(AgentType::Documentation),
            Arc::new(Succeed),
        )))
        .await;

        let status = orch.get_status().await;
        assert_eq!(status.agents.total, 2);
        assert_eq!(status.agents.available, 2);
        assert_eq!(status.agents.by_type[&AgentType::Programming], 1);
        assert_eq!(status.agents.by_type[&AgentType::Documentation], 1);
    }

    #[tokio::test]
    async fn test_priority_wins_within_pass() {
        let orch = Orchestrator::default();
        orch.register_agent(agent("coder", Arc::new(Succeed))).await;
        orch.submit_task(Task::new("low", "").with_priority(TaskPriority::Low))
            .await
            .unwrap();
        let urgent = orch
            .submit_task(Task::new("urgent", "").with_priority(TaskPriority::Critical))
            .await
            .unwrap();
        orch.distribute_once().await;
        assert_eq!(
            orch.get_task(urgent).await.unwrap().status(),
            TaskStatus::Assigned
        );
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let orch = Orchestrator::default();
        let runner = orch.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        while !orch.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(orch.run().await.is_err());
        orch.stop();
        handle.await.unwrap().unwrap();
        assert!(!orch.is_running());
    }
}
