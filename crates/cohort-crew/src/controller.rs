//! The autonomous crew controller.
//!
//! A run goes through three phases:
//!
//! 1. **Planning**: decompose the goal, letting the agents vote when the
//!    decomposer offers alternatives.
//! 2. **Iterating**: repeatedly pick the ready subtasks, hand them out with
//!    the current strategy, execute them concurrently and periodically adapt
//!    the strategy to what has worked so far.
//! 3. **Finalizing**: aggregate everything into a [`CrewRunResult`].
//!
//! A fatal error (no agents, or a stall) triggers one recovery pass followed
//! by one retry of the whole run.

use crate::config::CrewConfig;
use crate::strategy::{CrewStrategy, StrategyLedger, StrategyScore};
use crate::types::{CrewPhase, CrewRunResult, CrewRunStatus, TaskReport};
use chrono::{DateTime, Utc};
use cohort_consensus::{
    ConsensusConfig, Decision, DecisionHistory, DecisionType, DemocraticVoting, Proposal, Voter,
};
use cohort_core::{
    Agent, AgentId, AgentStatus, AgentType, CohortError, CohortResult, FailureOutcome, Task,
    TaskId, TaskOutput, TaskStatus,
};
use cohort_orchestrator::assignment::{compatible_candidates, rotated};
use cohort_orchestrator::{
    AssignmentStrategy, ExecutionPlan, HierarchicalDecomposer, TaskDecomposition,
    WeightedLoadScorer,
};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One finished execution of a task, not yet folded into the crew's copy.
struct Attempt {
    task: Task,
    result: CohortResult<TaskOutput>,
    elapsed: Duration,
}

/// Decomposes a goal and drives its subtasks to completion with a team of
/// agents.
pub struct Crew {
    config: CrewConfig,
    decomposer: HierarchicalDecomposer,
    voting: DemocraticVoting,
    agents: Vec<Arc<Agent>>,
    /// Goal the current subtasks were planned for.
    goal: Option<TaskId>,
    /// Authoritative copy of every subtask, in plan order.
    tasks: Vec<Task>,
    plan: ExecutionPlan,
    decomposition: Option<String>,
    decisions: DecisionHistory,
    decisions_made: usize,
    ledger: StrategyLedger,
    current: CrewStrategy,
    phase: CrewPhase,
    rr_cursor: usize,
}

impl Crew {
    /// Votes use the crew's `consensus_threshold`.
    pub fn new(config: CrewConfig, decomposer: HierarchicalDecomposer) -> Self {
        let voting = DemocraticVoting::new(ConsensusConfig {
            consensus_threshold: config.consensus_threshold,
            ..ConsensusConfig::default()
        });
        Self::with_voting(config, decomposer, voting)
    }

    pub fn with_voting(
        config: CrewConfig,
        decomposer: HierarchicalDecomposer,
        voting: DemocraticVoting,
    ) -> Self {
        let decisions = DecisionHistory::new(voting.config().history_limit);
        let current = config.starting_strategy();
        Self {
            config,
            decomposer,
            voting,
            agents: Vec::new(),
            goal: None,
            tasks: Vec::new(),
            plan: ExecutionPlan::default(),
            decomposition: None,
            decisions,
            decisions_made: 0,
            ledger: StrategyLedger::new(),
            current,
            phase: CrewPhase::Idle,
            rr_cursor: 0,
        }
    }

    pub fn config(&self) -> &CrewConfig {
        &self.config
    }

    /// Add an agent to the crew.
    pub fn summon_agent(&mut self, agent: Arc<Agent>) -> AgentId {
        let id = agent.id();
        info!(agent_id = %id, name = %agent.name(), agent_type = %agent.agent_type(), "Agent summoned");
        self.agents.push(agent);
        id
    }

    /// Remove an agent. Tasks waiting in its queue go back to pending.
    pub fn dismiss_agent(&mut self, agent_id: AgentId) -> Option<Arc<Agent>> {
        let pos = self.agents.iter().position(|a| a.id() == agent_id)?;
        let agent = self.agents.remove(pos);
        let mut requeued = 0;
        while let Some(queued) = agent.get_next_task() {
            if let Some(task) = self.tasks.iter_mut().find(|t| t.id == queued.id) {
                if task.transition(TaskStatus::Pending).is_ok() {
                    requeued += 1;
                }
            }
        }
        info!(agent_id = %agent_id, name = %agent.name(), requeued, "Agent dismissed");
        Some(agent)
    }

    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    /// Subtasks of the current goal, in plan order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn decisions(&self) -> &DecisionHistory {
        &self.decisions
    }

    pub fn strategy_report(&self) -> Vec<StrategyScore> {
        self.ledger.report()
    }

    pub fn current_strategy(&self) -> CrewStrategy {
        self.current
    }

    pub fn phase(&self) -> CrewPhase {
        self.phase
    }

    /// Run the crew on `goal` until its subtasks are done, the iteration or
    /// runtime budget is spent, or a fatal error survives recovery.
    ///
    /// Subtasks left unfinished by an interrupted run of the same goal are
    /// resumed. A different goal, or a goal whose subtasks have all settled,
    /// is planned from scratch.
    pub async fn run(&mut self, goal: Task) -> CohortResult<CrewRunResult> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let decisions_before = self.decisions_made;
        self.current = self.config.starting_strategy();
        info!(run_id = %run_id, goal = %goal.title, strategy = %self.current, "Crew run started");

        let mut iterations = 0;
        let mut recovered = false;
        let outcome = match self.run_once(&goal, started, &mut iterations).await {
            Err(e) if self.config.auto_recovery && is_recoverable(&e) => {
                warn!(run_id = %run_id, error = %e, "Crew run failed, attempting recovery");
                let reset = self.recover(Utc::now());
                recovered = true;
                info!(run_id = %run_id, reset, "Recovery finished, retrying run");
                self.run_once(&goal, started, &mut iterations).await
            }
            other => other,
        };

        let completion_confirmed = match outcome {
            Ok(confirmed) => confirmed,
            Err(e) => {
                error!(run_id = %run_id, error = %e, recovered, "Crew run aborted");
                self.phase = CrewPhase::Idle;
                return Err(e);
            }
        };

        self.phase = CrewPhase::Finalizing;
        let result = self.finalize(
            run_id,
            &goal,
            started,
            iterations,
            self.decisions_made - decisions_before,
            recovered,
            completion_confirmed,
        );
        self.phase = CrewPhase::Idle;
        Ok(result)
    }

    /// Plan if needed, then iterate. Returns whether completion was
    /// confirmed.
    async fn run_once(
        &mut self,
        goal: &Task,
        started: Instant,
        iterations: &mut usize,
    ) -> CohortResult<bool> {
        self.phase = CrewPhase::Planning;
        if self.goal != Some(goal.id) || self.is_settled() {
            self.discard_plan();
            self.plan_goal(goal)?;
        }
        if self.agents.is_empty() {
            return Err(CohortError::NoAgents);
        }

        self.phase = CrewPhase::Iterating;
        let interval = self.config.adaptation_interval.max(1);
        for iteration in 1..=self.config.max_iterations {
            if let Some(budget) = self.config.max_runtime() {
                if started.elapsed() >= budget {
                    warn!(iteration, budget_secs = budget.as_secs(), "Crew runtime budget spent");
                    return Ok(false);
                }
            }
            *iterations += 1;

            let ready = self.ready_tasks();
            if ready.is_empty() {
                if self.all_completed() {
                    return Ok(self.confirm_completion());
                }
                let in_flight = self
                    .tasks
                    .iter()
                    .filter(|t| matches!(t.status(), TaskStatus::Assigned | TaskStatus::InProgress))
                    .count();
                if in_flight > 0 {
                    return Err(CohortError::Stalled(format!(
                        "{in_flight} task(s) assigned or in progress with nothing ready"
                    )));
                }
                info!(iteration, "No runnable subtasks left");
                return Ok(false);
            }

            debug!(iteration, ready = ready.len(), strategy = %self.current, "Crew iteration");
            let dispatched = self.dispatch(&ready).await?;
            if dispatched == 0 {
                return Err(CohortError::Stalled(format!(
                    "{} ready task(s) but no agent could take any",
                    ready.len()
                )));
            }

            if iteration % interval == 0 {
                self.adapt();
            }
            if self.all_completed() {
                return Ok(self.confirm_completion());
            }
        }

        warn!(max_iterations = self.config.max_iterations, "Crew iteration budget spent");
        Ok(false)
    }

    // --- Planning ---

    fn plan_goal(&mut self, goal: &Task) -> CohortResult<()> {
        if goal.status() != TaskStatus::Pending {
            return Err(CohortError::Crew(format!(
                "Goal {} is {}, expected pending",
                goal.id,
                goal.status()
            )));
        }

        let mut proposals = self.decomposer.propose_decompositions(goal);
        if proposals.is_empty() {
            return Err(CohortError::Decomposition(format!(
                "No decomposition for goal {}",
                goal.id
            )));
        }

        let chosen = if self.config.vote_on_decomposition
            && proposals.len() > 1
            && !self.agents.is_empty()
        {
            let options: Vec<Proposal> = proposals.iter().map(decomposition_proposal).collect();
            let decision = self.voting.conduct(
                DecisionType::Decomposition,
                format!("How should '{}' be decomposed?", goal.title),
                &options,
                &self.voters(),
            );
            let idx = decision
                .winner()
                .and_then(|w| options.iter().position(|p| p.id == w))
                .unwrap_or(0);
            self.record(decision);
            idx
        } else {
            0
        };

        let decomposition = proposals.swap_remove(chosen);
        info!(
            goal = %goal.title,
            decomposition = %decomposition.label(),
            complexity = decomposition.complexity,
            cycle_broken = decomposition.plan.cycle_broken,
            "Crew plan ready"
        );
        self.decomposition = Some(decomposition.label());
        self.plan = decomposition.plan;
        self.tasks = decomposition.subtasks;
        self.goal = Some(goal.id);
        Ok(())
    }

    /// True when no held subtask can make further progress: each one is
    /// terminal, failed for good, or blocked behind such a task.
    fn is_settled(&self) -> bool {
        let blocked = self.blocked_tasks();
        self.tasks.iter().all(|t| {
            t.status().is_terminal()
                || (t.status() == TaskStatus::Failed && !t.is_retryable())
                || blocked.contains(&t.id)
        })
    }

    /// Forget the current goal's subtasks, pulling any still queued out of
    /// agent queues.
    fn discard_plan(&mut self) {
        for task in self.tasks.iter().filter(|t| t.status() == TaskStatus::Assigned) {
            for agent in &self.agents {
                agent.remove_task(task.id);
            }
        }
        if let Some(previous) = self.goal.take() {
            debug!(goal_id = %previous, tasks = self.tasks.len(), "Discarding previous plan");
        }
        self.tasks.clear();
        self.plan = ExecutionPlan::default();
        self.decomposition = None;
    }

    // --- Iterating ---

    /// Pending subtasks whose dependencies are met, in schedule order.
    ///
    /// A dependency counts as met when it is completed, when the crew does
    /// not track it, or when the plan put it in the same or a later stage
    /// (only possible after cycle breaking).
    fn ready_tasks(&self) -> Vec<TaskId> {
        let status: HashMap<TaskId, TaskStatus> =
            self.tasks.iter().map(|t| (t.id, t.status())).collect();
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Pending)
            .filter(|t| {
                t.dependencies().iter().all(|dep| match status.get(dep) {
                    None | Some(TaskStatus::Completed) => true,
                    Some(_) => match (self.plan.stage_of(*dep), self.plan.stage_of(t.id)) {
                        (Some(dep_stage), Some(stage)) => dep_stage >= stage,
                        _ => false,
                    },
                })
            })
            .collect();
        ready.sort_by_key(|t| t.schedule_key());
        ready.into_iter().map(|t| t.id).collect()
    }

    fn all_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|t| t.status() == TaskStatus::Completed)
    }

    /// Hand out and execute the ready tasks with the current strategy.
    /// Returns how many were dispatched.
    ///
    /// Every finished attempt is settled first; a queued task that could not
    /// be started is then reported as an error.
    async fn dispatch(&mut self, ready: &[TaskId]) -> CohortResult<usize> {
        let strategy = self.current;
        let mut unstartable = None;
        let attempts = if strategy == CrewStrategy::Competitive {
            self.compete(ready).await
        } else {
            if self.enqueue(strategy, ready) == 0 {
                return Ok(0);
            }
            let runs = self
                .agents
                .iter()
                .filter(|a| a.queue_len() > 0)
                .cloned()
                .map(drain_queue);
            let mut attempts = Vec::new();
            for drained in join_all(runs).await {
                attempts.extend(drained.attempts);
                if unstartable.is_none() {
                    unstartable = drained.unstartable;
                }
            }
            attempts
        };

        let dispatched = attempts.len();
        for attempt in attempts {
            self.ledger
                .record(strategy, attempt.result.is_ok(), attempt.elapsed);
            self.settle(attempt);
        }
        match unstartable {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }

    /// Put each ready task into the queue of the agent the strategy picks.
    fn enqueue(&mut self, strategy: CrewStrategy, ready: &[TaskId]) -> usize {
        let mut enqueued = 0;
        for id in ready {
            let Some(idx) = self.tasks.iter().position(|t| t.id == *id) else {
                continue;
            };
            let snapshot = self.tasks[idx].clone();
            let Some(agent) = self.choose_agent(strategy, &snapshot) else {
                debug!(task_id = %id, strategy = %strategy, "No agent for task this iteration");
                continue;
            };

            let task = &mut self.tasks[idx];
            if let Err(e) = task
                .transition(TaskStatus::Queued)
                .and_then(|()| task.transition(TaskStatus::Assigned))
            {
                error!(task_id = %id, error = %e, "Cannot assign task");
                continue;
            }
            task.assigned_agent = Some(agent.id());
            match agent.try_add_task(task.clone()) {
                Ok(()) => {
                    enqueued += 1;
                    debug!(task_id = %id, agent = %agent.name(), "Task assigned");
                }
                Err(_) => {
                    warn!(task_id = %id, agent = %agent.name(), "Agent rejected task");
                    if let Err(e) = task.transition(TaskStatus::Pending) {
                        error!(task_id = %id, error = %e, "Cannot return rejected task to pending");
                    }
                }
            }
        }
        enqueued
    }

    fn choose_agent(&mut self, strategy: CrewStrategy, task: &Task) -> Option<Arc<Agent>> {
        let candidates = compatible_candidates(task, &self.agents);
        if candidates.is_empty() {
            return None;
        }
        match strategy {
            CrewStrategy::Democratic => self.vote_assignee(task, &candidates),
            _ => self.delegate(task, &candidates),
        }
    }

    /// A manager, if the crew has one, routes work to specialists; without
    /// one, work rotates round-robin.
    fn delegate(&mut self, task: &Task, candidates: &[Arc<Agent>]) -> Option<Arc<Agent>> {
        let scorer = WeightedLoadScorer::default();
        let manager = self
            .agents
            .iter()
            .find(|a| a.agent_type() == AgentType::Management && a.is_healthy());
        let workers: Vec<Arc<Agent>> = candidates
            .iter()
            .filter(|a| a.agent_type() != AgentType::Management)
            .cloned()
            .collect();
        let pool = if workers.is_empty() {
            candidates.to_vec()
        } else {
            workers
        };

        match manager {
            Some(manager) => {
                let picked = AssignmentStrategy::Specialized
                    .select(task, &pool, &scorer)
                    .cloned();
                if let Some(agent) = &picked {
                    debug!(manager = %manager.name(), task_id = %task.id, worker = %agent.name(), "Delegated");
                }
                picked
            }
            None => {
                let order = rotated(&pool, self.rr_cursor);
                self.rr_cursor = self.rr_cursor.wrapping_add(1);
                AssignmentStrategy::RoundRobin
                    .select(task, &order, &scorer)
                    .cloned()
            }
        }
    }

    /// Every agent votes on which candidate should take `task`.
    fn vote_assignee(&mut self, task: &Task, candidates: &[Arc<Agent>]) -> Option<Arc<Agent>> {
        let proposals: Vec<Proposal> = candidates
            .iter()
            .map(|a| {
                let fit = if task.required_type == Some(a.agent_type()) {
                    10.0
                } else {
                    0.0
                };
                Proposal::new(a.id().to_string(), fit - a.queue_len() as f64)
                    .with_description(a.name())
                    .with_kind(a.agent_type())
                    .with_proposer(a.id())
            })
            .collect();
        let decision = self.voting.conduct(
            DecisionType::TaskAssignment,
            format!("Who should take '{}'?", task.title),
            &proposals,
            &self.voters(),
        );
        let winner = decision.winner().map(str::to_string);
        self.record(decision);
        let winner = winner?;
        candidates
            .iter()
            .find(|a| a.id().to_string() == winner)
            .cloned()
    }

    /// Race up to `competitive_fanout` agents on each ready task. Each agent
    /// joins at most one race per iteration.
    async fn compete(&mut self, ready: &[TaskId]) -> Vec<Attempt> {
        let fanout = self.config.competitive_fanout.max(1);
        let mut claimed: HashSet<AgentId> = HashSet::new();
        let mut races = Vec::new();

        for id in ready {
            let Some(task) = self.tasks.iter_mut().find(|t| t.id == *id) else {
                continue;
            };
            let racers: Vec<Arc<Agent>> = compatible_candidates(task, &self.agents)
                .into_iter()
                .filter(|a| !claimed.contains(&a.id()))
                .take(fanout)
                .collect();
            let Some(lead) = racers.first() else {
                continue;
            };
            if let Err(e) = task
                .transition(TaskStatus::Queued)
                .and_then(|()| task.transition(TaskStatus::Assigned))
                .and_then(|()| task.transition(TaskStatus::InProgress))
            {
                error!(task_id = %id, error = %e, "Cannot start race");
                continue;
            }
            task.assigned_agent = Some(lead.id());
            claimed.extend(racers.iter().map(|a| a.id()));
            info!(task_id = %id, racers = racers.len(), "Race started");
            races.push(race(task.clone(), racers));
        }

        join_all(races).await
    }

    /// Fold an attempt back into the crew's copy of the task.
    fn settle(&mut self, attempt: Attempt) {
        let Some(slot) = self.tasks.iter_mut().find(|t| t.id == attempt.task.id) else {
            return;
        };
        let mut task = attempt.task;
        let elapsed_ms = attempt.elapsed.as_millis() as u64;
        match attempt.result {
            Ok(output) => match task.complete(output) {
                Ok(()) => info!(task_id = %task.id, title = %task.title, elapsed_ms, "Subtask completed"),
                Err(e) => error!(task_id = %task.id, error = %e, "Cannot complete subtask"),
            },
            Err(err) => match task.record_failure(err.to_string()) {
                Ok(FailureOutcome::Retrying { attempt }) => warn!(
                    task_id = %task.id,
                    attempt,
                    max_retries = task.max_retries,
                    error = %err,
                    "Subtask failed, will retry"
                ),
                Ok(FailureOutcome::Exhausted) => error!(
                    task_id = %task.id,
                    retries = task.retry_count,
                    error = %err,
                    "Subtask failed permanently"
                ),
                Err(e) => error!(task_id = %task.id, error = %e, "Cannot record failure"),
            },
        }
        *slot = task;
    }

    /// Re-score strategies and, in adaptive mode, let the agents vote on the
    /// next one.
    fn adapt(&mut self) {
        if self.config.strategy != CrewStrategy::Adaptive {
            return;
        }
        let proposals: Vec<Proposal> = CrewStrategy::concrete()
            .into_iter()
            .map(|s| {
                let stats = self.ledger.stats(s);
                Proposal::new(s.to_string(), stats.score()).with_description(format!(
                    "{} attempts, {:.0}% success",
                    stats.attempts,
                    stats.success_rate() * 100.0
                ))
            })
            .collect();
        let decision = self.voting.conduct(
            DecisionType::Strategy,
            "Which strategy should the crew use next?",
            &proposals,
            &self.voters(),
        );
        let next = decision
            .winner()
            .and_then(|w| w.parse::<CrewStrategy>().ok())
            .unwrap_or_else(|| self.ledger.best());
        self.record(decision);
        if next != self.current {
            info!(from = %self.current, to = %next, "Crew strategy adapted");
            self.current = next;
        }
    }

    /// Everything is completed; check whether the agents agree. The "yes"
    /// option is only as strong as the run was healthy.
    fn confirm_completion(&mut self) -> bool {
        if !self.config.require_completion_vote {
            return true;
        }
        let health = self.run_health();
        let proposals = [
            Proposal::new("yes", health).with_description("the goal is complete"),
            Proposal::new("no", 1.0 - health).with_description("the result needs another look"),
        ];
        let decision = self.voting.conduct(
            DecisionType::Completion,
            "Is the goal complete?",
            &proposals,
            &self.voters(),
        );
        let confirmed = decision.winner() == Some("yes") && decision.consensus_reached();
        info!(confirmed, health, confidence = decision.confidence_score(), "Completion vote");
        self.record(decision);
        confirmed
    }

    /// In `0..=1`: the share of subtasks completed on the first attempt
    /// without errors, averaged with the success rate of the agents that did
    /// any work.
    fn run_health(&self) -> f64 {
        let clean = self
            .tasks
            .iter()
            .filter(|t| {
                t.status() == TaskStatus::Completed && t.retry_count == 0 && t.error.is_none()
            })
            .count() as f64
            / self.tasks.len().max(1) as f64;
        let rates: Vec<f64> = self
            .agents
            .iter()
            .map(|a| a.metrics())
            .filter(|m| m.total_tasks() > 0)
            .map(|m| m.success_rate)
            .collect();
        let agents = if rates.is_empty() {
            1.0
        } else {
            rates.iter().sum::<f64>() / rates.len() as f64
        };
        (clean + agents) / 2.0
    }

    fn voters(&self) -> Vec<Voter> {
        self.agents
            .iter()
            .filter(|a| a.is_healthy())
            .map(|a| Voter::from(a.as_ref()))
            .collect()
    }

    fn record(&mut self, decision: Decision) {
        self.decisions_made += 1;
        self.decisions.record(decision);
    }

    // --- Recovery ---

    /// Requeue retryable failures and release tasks that have been in flight
    /// longer than `stale_task_secs`. Returns how many tasks were reset.
    fn recover(&mut self, now: DateTime<Utc>) -> usize {
        let stale_after = self.config.stale_after();
        let mut reset = 0;
        for task in &mut self.tasks {
            match task.status() {
                TaskStatus::Failed if task.is_retryable() => {
                    if let Ok(FailureOutcome::Retrying { .. }) = task.retry_failed() {
                        reset += 1;
                    }
                }
                TaskStatus::Assigned | TaskStatus::InProgress => {
                    let since = task.started_at.unwrap_or(task.created_at);
                    if now - since < stale_after {
                        continue;
                    }
                    for agent in &self.agents {
                        agent.remove_task(task.id);
                    }
                    let agent = task.assigned_agent;
                    if task.transition(TaskStatus::Pending).is_ok() {
                        warn!(task_id = %task.id, agent = ?agent, "Stale task reset to pending");
                        reset += 1;
                    }
                }
                _ => {}
            }
        }
        reset
    }

    // --- Finalizing ---

    fn finalize(
        &self,
        run_id: Uuid,
        goal: &Task,
        started: Instant,
        iterations: usize,
        decisions: usize,
        recovered: bool,
        completion_confirmed: bool,
    ) -> CrewRunResult {
        let count = |wanted: &[TaskStatus]| {
            self.tasks
                .iter()
                .filter(|t| wanted.contains(&t.status()))
                .count()
        };
        let total_tasks = self.tasks.len();
        let completed = count(&[TaskStatus::Completed]);
        let failed = count(&[
            TaskStatus::Failed,
            TaskStatus::Timeout,
            TaskStatus::Cancelled,
        ]);
        let blocked = self.blocked_tasks().len();
        let unfinished = total_tasks - completed - failed - blocked;

        let status = if completed == total_tasks && completion_confirmed {
            CrewRunStatus::Completed
        } else {
            CrewRunStatus::CompletedWithErrors
        };
        let result = CrewRunResult {
            run_id,
            goal: goal.title.clone(),
            status,
            decomposition: self.decomposition.clone(),
            strategy: self.current,
            total_tasks,
            completed,
            failed,
            blocked,
            unfinished,
            iterations,
            decisions,
            recovered,
            completion_confirmed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            tasks: self.tasks.iter().map(TaskReport::from).collect(),
        };
        info!(
            run_id = %run_id,
            status = ?result.status,
            completed,
            failed,
            blocked,
            iterations,
            "Crew run finished"
        );
        result
    }

    /// Pending tasks that transitively depend on a task that can no longer
    /// complete.
    fn blocked_tasks(&self) -> HashSet<TaskId> {
        let mut dead: HashSet<TaskId> = self
            .tasks
            .iter()
            .filter(|t| {
                matches!(
                    t.status(),
                    TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
                )
            })
            .map(|t| t.id)
            .collect();
        let mut blocked = HashSet::new();
        loop {
            let newly: Vec<TaskId> = self
                .tasks
                .iter()
                .filter(|t| t.status() == TaskStatus::Pending && !blocked.contains(&t.id))
                .filter(|t| t.dependencies().iter().any(|d| dead.contains(d)))
                .map(|t| t.id)
                .collect();
            if newly.is_empty() {
                break;
            }
            dead.extend(newly.iter().copied());
            blocked.extend(newly);
        }
        blocked
    }
}

fn is_recoverable(error: &CohortError) -> bool {
    matches!(error, CohortError::NoAgents | CohortError::Stalled(_))
}

/// A decomposition as a vote option, aimed at the agent type most of its
/// subtasks want.
fn decomposition_proposal(decomposition: &TaskDecomposition) -> Proposal {
    let mut counts: Vec<(AgentType, usize)> = Vec::new();
    for agent_type in decomposition.subtasks.iter().filter_map(|t| t.required_type) {
        match counts.iter_mut().find(|(t, _)| *t == agent_type) {
            Some((_, n)) => *n += 1,
            None => counts.push((agent_type, 1)),
        }
    }
    let dominant = counts
        .iter()
        .fold(None, |best: Option<(AgentType, usize)>, &(t, n)| match best {
            Some((_, b)) if n <= b => best,
            _ => Some((t, n)),
        })
        .map(|(t, _)| t);

    let proposal = Proposal::new(decomposition.label(), 1.0)
        .with_description(decomposition.kind.to_string())
        .with_items(decomposition.subtasks.iter().map(|t| t.title.clone()));
    match dominant {
        Some(agent_type) => proposal.with_kind(agent_type),
        None => proposal,
    }
}

/// Execute an agent's task on a separate tokio task so a panicking executor
/// becomes an ordinary failure.
async fn run_guarded(agent: &Arc<Agent>, task: &Task) -> (CohortResult<TaskOutput>, Duration) {
    let started = Instant::now();
    let runner = Arc::clone(agent);
    let work = task.clone();
    let result = match tokio::spawn(async move { runner.execute_task(&work).await }).await {
        Ok(result) => result,
        Err(join_err) => Err(CohortError::Agent(format!("executor panicked: {join_err}"))),
    };
    let elapsed = started.elapsed();
    agent.record_task_completion(result.is_ok(), elapsed);
    (result, elapsed)
}

/// What one agent's queue produced.
#[derive(Default)]
struct Drained {
    attempts: Vec<Attempt>,
    /// First queued task that could not be started.
    unstartable: Option<CohortError>,
}

/// Run everything in one agent's queue, highest priority first.
async fn drain_queue(agent: Arc<Agent>) -> Drained {
    let mut drained = Drained::default();
    if matches!(
        agent.status(),
        AgentStatus::Paused | AgentStatus::Error | AgentStatus::Stopped
    ) {
        return drained;
    }
    while let Some(mut task) = agent.get_next_task() {
        if let Err(e) = task.transition(TaskStatus::InProgress) {
            error!(task_id = %task.id, agent = %agent.name(), error = %e, "Queued task cannot start");
            drained.unstartable.get_or_insert(e);
            continue;
        }
        info!(task_id = %task.id, agent = %agent.name(), title = %task.title, "Subtask started");
        let (result, elapsed) = run_guarded(&agent, &task).await;
        drained.attempts.push(Attempt {
            task,
            result,
            elapsed,
        });
    }
    drained
}

/// Run `task` on every racer at once; the first success in racer order wins,
/// otherwise the first error is kept.
async fn race(mut task: Task, racers: Vec<Arc<Agent>>) -> Attempt {
    let runs = join_all(racers.iter().map(|a| run_guarded(a, &task))).await;
    let mut first_error = None;
    let mut slowest = Duration::ZERO;
    for (agent, (result, elapsed)) in racers.iter().zip(runs) {
        slowest = slowest.max(elapsed);
        match result {
            Ok(output) => {
                info!(task_id = %task.id, winner = %agent.name(), "Race won");
                task.assigned_agent = Some(agent.id());
                return Attempt {
                    task,
                    result: Ok(output),
                    elapsed,
                };
            }
            Err(e) => {
                debug!(task_id = %task.id, agent = %agent.name(), error = %e, "Racer failed");
                first_error.get_or_insert(e);
            }
        }
    }
    Attempt {
        task,
        result: Err(first_error.unwrap_or(CohortError::NoAgents)),
        elapsed: slowest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cohort_core::AgentCapabilities;
    use cohort_orchestrator::DecomposerConfig;

    struct Done;

    #[async_trait]
    impl cohort_core::TaskExecutor for Done {
        async fn execute(&self, _task: &Task) -> CohortResult<TaskOutput> {
            let mut out = TaskOutput::new();
            out.insert("ok".into(), serde_json::json!(true));
            Ok(out)
        }
    }

    fn crew(config: CrewConfig) -> Crew {
        let decomposer = HierarchicalDecomposer::new(DecomposerConfig::default()).unwrap();
        Crew::new(config, decomposer)
    }

    fn worker(name: &str, agent_type: AgentType) -> Arc<Agent> {
        Arc::new(Agent::new(
            name,
            AgentCapabilities::new(agent_type),
            Arc::new(Done),
        ))
    }

    #[tokio::test]
    async fn test_recovers_stale_in_progress_task() {
        let mut crew = crew(CrewConfig::default());
        crew.summon_agent(worker("w", AgentType::General));

        let mut stuck = Task::new("Stuck", "left behind by a crashed run");
        stuck.transition(TaskStatus::Queued).unwrap();
        stuck.transition(TaskStatus::Assigned).unwrap();
        stuck.transition(TaskStatus::InProgress).unwrap();
        stuck.started_at = Some(Utc::now() - chrono::Duration::minutes(10));
        let id = stuck.id;
        crew.goal = Some(id);
        crew.tasks = vec![stuck.clone()];
        crew.plan = ExecutionPlan::build(&[id], &Default::default());

        let result = crew.run(stuck).await.unwrap();
        assert!(result.recovered);
        assert!(result.is_success());
        let task = &crew.tasks()[0];
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(TaskStatus::is_valid_path(task.history()));
        assert!(task
            .history()
            .windows(2)
            .any(|w| w == [TaskStatus::InProgress, TaskStatus::Pending]));
    }

    #[tokio::test]
    async fn test_fresh_in_progress_task_is_not_reset() {
        let mut crew = crew(CrewConfig::default());
        crew.summon_agent(worker("w", AgentType::General));

        let mut busy = Task::new("Busy", "still running elsewhere");
        busy.transition(TaskStatus::Queued).unwrap();
        busy.transition(TaskStatus::Assigned).unwrap();
        busy.transition(TaskStatus::InProgress).unwrap();
        crew.goal = Some(busy.id);
        crew.tasks = vec![busy.clone()];

        let err = crew.run(busy).await.unwrap_err();
        assert!(matches!(err, CohortError::Stalled(_)));
        assert_eq!(crew.tasks()[0].status(), TaskStatus::InProgress);
        assert_eq!(crew.phase(), CrewPhase::Idle);
    }

    #[test]
    fn test_recover_requeues_retryable_failures() {
        let mut crew = crew(CrewConfig::default());
        let mut task = Task::new("Flaky", "").with_max_retries(2);
        task.transition(TaskStatus::Queued).unwrap();
        task.transition(TaskStatus::Assigned).unwrap();
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        crew.tasks = vec![task];

        assert_eq!(crew.recover(Utc::now()), 1);
        assert_eq!(crew.tasks[0].status(), TaskStatus::Pending);
        assert_eq!(crew.tasks[0].retry_count, 1);
    }

    #[test]
    fn test_blocked_is_transitive() {
        let mut crew = crew(CrewConfig::default());
        let mut root = Task::new("root", "").with_max_retries(0);
        root.transition(TaskStatus::Queued).unwrap();
        root.transition(TaskStatus::Assigned).unwrap();
        root.transition(TaskStatus::InProgress).unwrap();
        root.record_failure("boom").unwrap();
        let mid = Task::new("mid", "").with_dependencies([root.id]);
        let leaf = Task::new("leaf", "").with_dependencies([mid.id]);
        let free = Task::new("free", "");
        let (mid_id, leaf_id) = (mid.id, leaf.id);
        crew.tasks = vec![root, mid, leaf, free];

        let blocked = crew.blocked_tasks();
        assert_eq!(blocked.len(), 2);
        assert!(blocked.contains(&mid_id) && blocked.contains(&leaf_id));
    }

    #[test]
    fn test_decomposition_proposal_targets_dominant_type() {
        let decomposer = HierarchicalDecomposer::new(DecomposerConfig::default()).unwrap();
        let goal = Task::new(
            "Build REST API",
            "Design and implement a scalable, secure REST API with authentication, \
             database integration and a complete test suite for the platform",
        )
        .with_priority(cohort_core::TaskPriority::Critical);
        let decomposition = decomposer.decompose(&goal);
        let proposal = decomposition_proposal(&decomposition);
        assert_eq!(proposal.id, decomposition.label());
        assert_eq!(proposal.size(), decomposition.subtasks.len());
        assert!(proposal.kind.is_some());
    }
}
