//! Simulated agents for running the engine without real tools.

use crate::config::AgentSpec;
use async_trait::async_trait;
use cohort_core::{
    Agent, AgentCapabilities, CohortResult, Task, TaskExecutor, TaskOutput, ToolOutcome,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize)]
struct Report<'a> {
    agent: &'a str,
    summary: String,
    latency_ms: u64,
}

/// Sleeps for a fixed latency, then reports success unless the task text
/// mentions one of the fail keywords.
pub struct SimulatedExecutor {
    agent_name: String,
    latency: Duration,
    fail_keywords: Vec<String>,
}

impl SimulatedExecutor {
    pub fn from_spec(spec: &AgentSpec) -> Self {
        Self {
            agent_name: spec.name.clone(),
            latency: Duration::from_millis(spec.latency_ms),
            fail_keywords: spec
                .fail_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    fn outcome(&self, task: &Task) -> CohortResult<ToolOutcome> {
        let text = format!("{} {}", task.title, task.description).to_lowercase();
        if let Some(keyword) = self.fail_keywords.iter().find(|k| text.contains(k.as_str())) {
            return Ok(ToolOutcome::failure(format!(
                "{} refused '{}': mentions '{keyword}'",
                self.agent_name, task.title
            )));
        }
        let report = Report {
            agent: &self.agent_name,
            summary: format!("{} done", task.title),
            latency_ms: self.latency.as_millis() as u64,
        };
        Ok(ToolOutcome::success(serde_json::to_value(report)?))
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task: &Task) -> CohortResult<TaskOutput> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.outcome(task)?.into_output()
    }
}

pub fn build_agent(spec: &AgentSpec) -> Arc<Agent> {
    let capabilities = spec
        .capabilities
        .iter()
        .fold(AgentCapabilities::new(spec.agent_type), |caps, c| {
            caps.with(c.as_str())
        });
    let executor = Arc::new(SimulatedExecutor::from_spec(spec));
    Arc::new(
        Agent::new(spec.name.as_str(), capabilities, executor)
            .with_concurrency_limit(spec.concurrency_limit),
    )
}

pub fn build_agents(specs: &[AgentSpec]) -> Vec<Arc<Agent>> {
    specs.iter().map(build_agent).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{AgentType, CohortError};

    fn spec() -> AgentSpec {
        AgentSpec {
            capabilities: vec!["rust".into(), "sql".into()],
            concurrency_limit: 4,
            fail_keywords: vec!["Legacy".into()],
            ..AgentSpec::new("sim", AgentType::Programming)
        }
    }

    #[test]
    fn test_build_agent_from_spec() {
        let agent = build_agent(&spec());
        assert_eq!(agent.name(), "sim");
        assert_eq!(agent.agent_type(), AgentType::Programming);
        assert_eq!(agent.concurrency_limit(), 4);
        assert!(agent.capabilities().has("rust"));
        assert!(agent.capabilities().has("sql"));
    }

    #[tokio::test]
    async fn test_success_output() {
        let agent = build_agent(&spec());
        let out = agent
            .execute_task(&Task::new("Add index", "on users.email"))
            .await
            .unwrap();
        assert_eq!(out["agent"], "sim");
        assert_eq!(out["summary"], "Add index done");
        assert_eq!(out["latency_ms"], 0);
    }

    #[tokio::test]
    async fn test_fail_keyword_is_case_insensitive() {
        let agent = build_agent(&spec());
        let err = agent
            .execute_task(&Task::new("Port module", "from the legacy codebase"))
            .await
            .unwrap_err();
        match err {
            CohortError::Agent(msg) => assert!(msg.contains("'legacy'")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
