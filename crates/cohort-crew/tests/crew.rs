#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Crew controller integration tests: planning, every strategy, adaptation,
//! completion votes and failure handling.

use async_trait::async_trait;
use cohort_consensus::DecisionType;
use cohort_core::*;
use cohort_crew::*;
use cohort_orchestrator::{DecomposerConfig, HierarchicalDecomposer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Mock executors
// ---------------------------------------------------------------------------

/// Succeeds and logs the titles it ran.
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TaskExecutor for Recorder {
    async fn execute(&self, task: &Task) -> CohortResult<TaskOutput> {
        self.log.lock().unwrap().push(task.title.clone());
        let mut out = TaskOutput::new();
        out.insert("title".into(), serde_json::json!(task.title));
        Ok(out)
    }
}

/// Fails tasks whose title starts with `prefix`, succeeds otherwise.
struct FailWhen {
    prefix: &'static str,
}

#[async_trait]
impl TaskExecutor for FailWhen {
    async fn execute(&self, task: &Task) -> CohortResult<TaskOutput> {
        if task.title.starts_with(self.prefix) {
            Err(CohortError::Agent(format!("cannot do {}", task.title)))
        } else {
            Ok(TaskOutput::new())
        }
    }
}

/// Always fails, counting calls.
struct AlwaysFails {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskExecutor for AlwaysFails {
    async fn execute(&self, _task: &Task) -> CohortResult<TaskOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CohortError::Agent("upstream unavailable".into()))
    }
}

/// Fails the first `failures` calls, then succeeds.
struct RecoversAfter {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl TaskExecutor for RecoversAfter {
    async fn execute(&self, _task: &Task) -> CohortResult<TaskOutput> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(CohortError::Agent("warming up".into()))
        } else {
            Ok(TaskOutput::new())
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_crew(config: CrewConfig) -> Crew {
    let decomposer = HierarchicalDecomposer::new(DecomposerConfig::default()).unwrap();
    Crew::new(config, decomposer)
}

fn fixed(strategy: CrewStrategy) -> CrewConfig {
    CrewConfig {
        strategy,
        ..CrewConfig::default()
    }
}

fn agent(name: &str, agent_type: AgentType, executor: Arc<dyn TaskExecutor>) -> Arc<Agent> {
    Arc::new(Agent::new(name, AgentCapabilities::new(agent_type), executor))
}

/// Decomposes into the api phases: design, implement, then test and
/// document in parallel.
fn api_goal() -> Task {
    Task::new(
        "Build REST API",
        "Design and implement a scalable, secure REST API with authentication, \
         database integration and a complete test suite for the platform",
    )
    .with_priority(TaskPriority::Critical)
}

/// Decomposes into a 3-part linear split.
fn pipeline_goal() -> Task {
    Task::new(
        "Ingest events",
        "Build a scalable, distributed ingestion pipeline with security hardening \
         and a plugin framework for partners",
    )
}

fn specialists(executor: Arc<dyn TaskExecutor>) -> Vec<Arc<Agent>> {
    [
        ("designer", AgentType::Design),
        ("coder", AgentType::Programming),
        ("tester", AgentType::Testing),
        ("writer", AgentType::Documentation),
    ]
    .into_iter()
    .map(|(name, t)| agent(name, t, Arc::clone(&executor)))
    .collect()
}

fn assert_matching_types(crew: &Crew) {
    for task in crew.tasks() {
        let assignee = task.assigned_agent.unwrap();
        let agent = crew.agents().iter().find(|a| a.id() == assignee).unwrap();
        assert_eq!(Some(agent.agent_type()), task.required_type, "{}", task.title);
    }
}

// ---------------------------------------------------------------------------
// 1. Hierarchical: manager delegates to specialists, stages run in order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hierarchical_run_completes_in_stage_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log: log.clone() });
    let mut crew = new_crew(fixed(CrewStrategy::Hierarchical));
    crew.summon_agent(agent("lead", AgentType::Management, executor.clone()));
    for a in specialists(executor) {
        crew.summon_agent(a);
    }

    let result = crew.run(api_goal()).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.total_tasks, 4);
    assert_eq!(result.completed, 4);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.strategy, CrewStrategy::Hierarchical);
    assert!(result
        .decomposition
        .as_deref()
        .unwrap()
        .starts_with("phased:api"));
    // Only the decomposition vote: the strategy is fixed.
    assert_eq!(result.decisions, 1);
    assert_eq!(
        crew.decisions().latest().unwrap().decision_type,
        DecisionType::Decomposition
    );

    let log = log.lock().unwrap();
    assert_eq!(log[0], "Design: Build REST API");
    assert_eq!(log[1], "Implement: Build REST API");
    assert_eq!(log.len(), 4);
    assert_matching_types(&crew);
    for task in crew.tasks() {
        assert!(TaskStatus::is_valid_path(task.history()));
    }
}

#[tokio::test]
async fn hierarchical_without_manager_rotates() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log });
    let mut crew = new_crew(fixed(CrewStrategy::Hierarchical));
    let first = crew.summon_agent(agent("a", AgentType::General, executor.clone()));
    let second = crew.summon_agent(agent("b", AgentType::General, executor));

    let result = crew.run(pipeline_goal()).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.total_tasks, 3);

    let assignees: Vec<AgentId> = crew
        .tasks()
        .iter()
        .map(|t| t.assigned_agent.unwrap())
        .collect();
    assert_eq!(assignees, vec![first, second, first]);
}

// ---------------------------------------------------------------------------
// 2. Democratic: agents vote each subtask to the matching specialist
// ---------------------------------------------------------------------------

#[tokio::test]
async fn democratic_votes_route_to_specialists() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log });
    let mut crew = new_crew(fixed(CrewStrategy::Democratic));
    for a in specialists(executor) {
        crew.summon_agent(a);
    }

    let result = crew.run(api_goal()).await.unwrap();

    assert!(result.is_success());
    assert_matching_types(&crew);
    let counts = crew.decisions().count_by_type();
    assert_eq!(counts[&DecisionType::TaskAssignment], 4);
    assert_eq!(counts[&DecisionType::Decomposition], 1);
    assert_eq!(result.decisions, 5);
}

// ---------------------------------------------------------------------------
// 3. Competitive: first success in agent order wins the race
// ---------------------------------------------------------------------------

#[tokio::test]
async fn competitive_first_success_wins() {
    let mut crew = new_crew(fixed(CrewStrategy::Competitive));
    let flaky = agent("flaky", AgentType::General, Arc::new(FailWhen { prefix: "" }));
    let steady = agent(
        "steady",
        AgentType::General,
        Arc::new(FailWhen { prefix: "never" }),
    );
    crew.summon_agent(flaky.clone());
    let steady_id = crew.summon_agent(steady.clone());

    let result = crew.run(Task::new("Fix typo", "README")).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.tasks[0].assigned_agent, Some(steady_id));
    assert_eq!(flaky.metrics().tasks_failed, 1);
    assert_eq!(steady.metrics().tasks_completed, 1);
}

// ---------------------------------------------------------------------------
// 4. Adaptive: every strategy gets tried and each switch is a decision
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adaptive_explores_every_strategy() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log });
    let config = CrewConfig {
        adaptation_interval: 1,
        ..CrewConfig::default()
    };
    let mut crew = new_crew(config);
    crew.summon_agent(agent("a", AgentType::General, executor.clone()));
    crew.summon_agent(agent("b", AgentType::General, executor));

    let result = crew.run(pipeline_goal()).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.iterations, 3);
    let report = crew.strategy_report();
    assert_eq!(report.len(), 3);
    assert!(report.iter().all(|r| r.attempts == 1 && r.success_rate == 1.0));

    let counts = crew.decisions().count_by_type();
    assert_eq!(counts[&DecisionType::Strategy], 3);
    // The democratic iteration voted on one assignee.
    assert_eq!(counts[&DecisionType::TaskAssignment], 1);
    assert_eq!(result.decisions, 4);
}

// ---------------------------------------------------------------------------
// 5. Completion vote
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_vote_confirms_goal() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log });
    let config = CrewConfig {
        strategy: CrewStrategy::Hierarchical,
        require_completion_vote: true,
        ..CrewConfig::default()
    };
    let mut crew = new_crew(config);
    for name in ["a", "b", "c"] {
        crew.summon_agent(agent(name, AgentType::General, executor.clone()));
    }

    let result = crew.run(Task::new("Tidy", "small")).await.unwrap();

    assert!(result.completion_confirmed);
    assert_eq!(result.status, CrewRunStatus::Completed);
    let completion = crew.decisions().latest().unwrap();
    assert_eq!(completion.decision_type, DecisionType::Completion);
    assert_eq!(completion.winner(), Some("yes"));
    assert_eq!(completion.votes().len(), 3);
}

#[tokio::test]
async fn completion_vote_rejects_an_unhealthy_run() {
    let config = CrewConfig {
        strategy: CrewStrategy::Hierarchical,
        require_completion_vote: true,
        ..CrewConfig::default()
    };
    let mut crew = new_crew(config);
    crew.summon_agent(agent(
        "shaky",
        AgentType::General,
        Arc::new(RecoversAfter {
            failures: 2,
            calls: AtomicUsize::new(0),
        }),
    ));

    let goal = Task::new("Rotate keys", "").with_max_retries(3);
    let result = crew.run(goal).await.unwrap();

    // Completed on the third attempt: no clean subtask, and the agent
    // succeeded once in three tries.
    assert_eq!(result.completed, 1);
    assert_eq!(result.tasks[0].retry_count, 2);
    assert!(!result.completion_confirmed);
    assert_eq!(result.status, CrewRunStatus::CompletedWithErrors);
    let completion = crew.decisions().latest().unwrap();
    assert_eq!(completion.decision_type, DecisionType::Completion);
    assert_eq!(completion.winner(), Some("no"));
}

// ---------------------------------------------------------------------------
// 6. Failures: bounded retries and blocked dependents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retries_are_bounded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut crew = new_crew(fixed(CrewStrategy::Hierarchical));
    crew.summon_agent(agent(
        "broken",
        AgentType::General,
        Arc::new(AlwaysFails {
            calls: calls.clone(),
        }),
    ));

    let goal = Task::new("Deploy", "push it").with_max_retries(2);
    let result = crew.run(goal).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.status, CrewRunStatus::CompletedWithErrors);
    assert_eq!(result.failed, 1);
    assert_eq!(result.tasks[0].retry_count, 2);
    assert_eq!(
        result.tasks[0].error.as_deref(),
        Some("Agent error: upstream unavailable")
    );
}

#[tokio::test]
async fn failed_phase_blocks_dependents() {
    let executor: Arc<dyn TaskExecutor> = Arc::new(FailWhen { prefix: "Design" });
    let config = CrewConfig {
        strategy: CrewStrategy::Hierarchical,
        vote_on_decomposition: false,
        ..CrewConfig::default()
    };
    let mut crew = new_crew(config);
    for a in specialists(executor) {
        crew.summon_agent(a);
    }

    let result = crew.run(api_goal().with_max_retries(0)).await.unwrap();

    assert_eq!(result.status, CrewRunStatus::CompletedWithErrors);
    assert_eq!(result.failed, 1);
    assert_eq!(result.blocked, 3);
    assert_eq!(result.completed, 0);
    assert_eq!(result.unfinished, 0);
    assert!(!result.recovered);
}

// ---------------------------------------------------------------------------
// 7. Fatal errors and roster management
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_agents_is_fatal_even_after_recovery() {
    let mut crew = new_crew(CrewConfig::default());
    let err = crew.run(Task::new("Lonely", "")).await.unwrap_err();
    assert!(matches!(err, CohortError::NoAgents));
    assert_eq!(crew.phase(), CrewPhase::Idle);
}

#[tokio::test]
async fn capability_gap_stalls() {
    let executor: Arc<dyn TaskExecutor> = Arc::new(FailWhen { prefix: "never" });
    let mut crew = new_crew(fixed(CrewStrategy::Hierarchical));
    crew.summon_agent(agent("plain", AgentType::General, executor));

    let goal = Task::new("Sign release", "").with_capability("gpg");
    let err = crew.run(goal).await.unwrap_err();
    assert!(matches!(err, CohortError::Stalled(_)));
    assert_eq!(crew.tasks()[0].status(), TaskStatus::Pending);
}

#[tokio::test]
async fn dismissed_agent_is_gone() {
    let executor: Arc<dyn TaskExecutor> = Arc::new(FailWhen { prefix: "never" });
    let mut crew = new_crew(CrewConfig::default());
    let keep = crew.summon_agent(agent("keep", AgentType::General, executor.clone()));
    let gone = crew.summon_agent(agent("drop", AgentType::General, executor));

    assert_eq!(crew.dismiss_agent(gone).unwrap().name(), "drop");
    assert!(crew.dismiss_agent(gone).is_none());
    assert_eq!(crew.agents().len(), 1);

    let result = crew.run(Task::new("Solo", "")).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.tasks[0].assigned_agent, Some(keep));
}

#[tokio::test]
async fn each_goal_gets_its_own_plan() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log: log.clone() });
    let mut crew = new_crew(fixed(CrewStrategy::Hierarchical));
    crew.summon_agent(agent("solo", AgentType::General, executor));

    let first = crew.run(Task::new("Write docs", "")).await.unwrap();
    let second = crew.run(Task::new("Fix login bug", "")).await.unwrap();

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(*log.lock().unwrap(), vec!["Write docs", "Fix login bug"]);
    assert_eq!(second.tasks.len(), 1);
    assert_eq!(second.tasks[0].title, "Fix login bug");
    assert_eq!(crew.tasks().len(), 1);
    assert_eq!(crew.tasks()[0].title, "Fix login bug");
}

#[tokio::test]
async fn same_goal_runs_again_once_settled() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log: log.clone() });
    let mut crew = new_crew(fixed(CrewStrategy::Hierarchical));
    crew.summon_agent(agent("solo", AgentType::General, executor));

    let goal = Task::new("Nightly build", "");
    crew.run(goal.clone()).await.unwrap();
    let again = crew.run(goal).await.unwrap();

    assert!(again.is_success());
    assert_eq!(again.completed, 1);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unstartable_queued_task_is_reported() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor: Arc<dyn TaskExecutor> = Arc::new(Recorder { log: log.clone() });
    let worker = Arc::new(
        Agent::new("busy", AgentCapabilities::new(AgentType::General), executor)
            .with_concurrency_limit(2),
    );
    // Left in the queue without ever being assigned, so it cannot start.
    let stray = Task::new("Stray", "").with_priority(TaskPriority::Critical);
    assert!(worker.add_task(stray));

    let mut crew = new_crew(fixed(CrewStrategy::Hierarchical));
    crew.summon_agent(worker);

    let err = crew.run(Task::new("Ship patch", "")).await.unwrap_err();
    assert!(matches!(
        err,
        CohortError::InvalidTransition {
            from: TaskStatus::Pending,
            to: TaskStatus::InProgress,
        }
    ));
    // The crew's own task still ran and was settled.
    assert_eq!(crew.tasks()[0].status(), TaskStatus::Completed);
    assert_eq!(*log.lock().unwrap(), vec!["Ship patch"]);
    assert_eq!(crew.phase(), CrewPhase::Idle);
}
