//! `cohort.toml` loading.

use cohort_consensus::ConsensusConfig;
use cohort_core::{AgentType, CohortError, CohortResult};
use cohort_crew::CrewConfig;
use cohort_orchestrator::{DecomposerConfig, OrchestratorConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Everything the binary reads from its config file. Every field has a
/// default, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohortConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub decomposer: DecomposerConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub crew: CrewConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

/// A simulated agent declared under `[[agents]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: AgentType,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Simulated execution time per task.
    #[serde(default)]
    pub latency_ms: u64,
    /// Tasks mentioning any of these words fail.
    #[serde(default)]
    pub fail_keywords: Vec<String>,
}

fn default_agent_type() -> AgentType {
    AgentType::General
}

fn default_concurrency_limit() -> usize {
    1
}

impl AgentSpec {
    pub fn new(name: &str, agent_type: AgentType) -> Self {
        Self {
            name: name.to_string(),
            agent_type,
            capabilities: Vec::new(),
            concurrency_limit: default_concurrency_limit(),
            latency_ms: 0,
            fail_keywords: Vec::new(),
        }
    }
}

impl CohortConfig {
    /// Read and validate `path`. A missing file yields the defaults; any
    /// other read failure is an [`CohortError::Io`].
    pub async fn load(path: &Path) -> CohortResult<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => toml::from_str::<CohortConfig>(&raw).map_err(|e| {
                CohortError::Config(format!("Invalid config file '{}': {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                CohortConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CohortResult<()> {
        for (section, threshold) in [
            ("consensus", self.consensus.consensus_threshold),
            ("crew", self.crew.consensus_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(CohortError::Config(format!(
                    "[{section}] consensus_threshold must be within 0..=1, got {threshold}"
                )));
            }
        }
        if self.decomposer.generic_split == 0 {
            return Err(CohortError::Config(
                "[decomposer] generic_split must be at least 1".into(),
            ));
        }
        if let Some(spec) = self.agents.iter().find(|a| a.concurrency_limit == 0) {
            return Err(CohortError::Config(format!(
                "agent '{}' has concurrency_limit 0",
                spec.name
            )));
        }
        Ok(())
    }

    /// Declared agents, or the default roster when none are declared.
    pub fn roster(&self) -> Vec<AgentSpec> {
        if self.agents.is_empty() {
            default_roster()
        } else {
            self.agents.clone()
        }
    }
}

/// One agent per specialisation plus a manager, with two programmers.
pub fn default_roster() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("lead", AgentType::Management),
        AgentSpec::new("architect", AgentType::Design),
        AgentSpec {
            concurrency_limit: 2,
            ..AgentSpec::new("coder-1", AgentType::Programming)
        },
        AgentSpec::new("coder-2", AgentType::Programming),
        AgentSpec::new("tester", AgentType::Testing),
        AgentSpec::new("writer", AgentType::Documentation),
        AgentSpec::new("analyst", AgentType::Analysis),
        AgentSpec::new("scout", AgentType::Research),
    ]
}
