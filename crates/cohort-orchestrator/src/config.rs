use crate::assignment::AssignmentStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and policy knobs for the orchestrator loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_distribution_interval_ms")]
    pub distribution_interval_ms: u64,
    #[serde(default = "default_agent_poll_interval_ms")]
    pub agent_poll_interval_ms: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default)]
    pub assignment_strategy: AssignmentStrategy,
}

fn default_distribution_interval_ms() -> u64 {
    100
}

fn default_agent_poll_interval_ms() -> u64 {
    50
}

fn default_health_check_interval_secs() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            distribution_interval_ms: default_distribution_interval_ms(),
            agent_poll_interval_ms: default_agent_poll_interval_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            assignment_strategy: AssignmentStrategy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn distribution_interval(&self) -> Duration {
        Duration::from_millis(self.distribution_interval_ms)
    }

    pub fn agent_poll_interval(&self) -> Duration {
        Duration::from_millis(self.agent_poll_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Heuristics for the hierarchical decomposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposerConfig {
    /// Tasks scoring above this are decomposed.
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: u32,
    /// Number of parts for the generic split when no phase pattern matches.
    #[serde(default = "default_generic_split")]
    pub generic_split: usize,
    /// Words that each add to a task's complexity score.
    #[serde(default = "default_complexity_keywords")]
    pub complexity_keywords: Vec<String>,
}

fn default_complexity_threshold() -> u32 {
    50
}

fn default_generic_split() -> usize {
    3
}

fn default_complexity_keywords() -> Vec<String> {
    [
        "system",
        "api",
        "integrate",
        "integration",
        "architecture",
        "database",
        "distributed",
        "pipeline",
        "migration",
        "security",
        "framework",
        "scalable",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: default_complexity_threshold(),
            generic_split: default_generic_split(),
            complexity_keywords: default_complexity_keywords(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.distribution_interval_ms, 100);
        assert_eq!(config.assignment_strategy, AssignmentStrategy::Specialized);
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            agent_poll_interval_ms = 5
            assignment_strategy = "round_robin"
            "#,
        )
        .unwrap();
        assert_eq!(config.agent_poll_interval(), Duration::from_millis(5));
        assert_eq!(config.assignment_strategy, AssignmentStrategy::RoundRobin);
    }

    #[test]
    fn test_decomposer_defaults() {
        let config: DecomposerConfig = toml::from_str("generic_split = 4").unwrap();
        assert_eq!(config.generic_split, 4);
        assert_eq!(config.complexity_threshold, 50);
        assert!(config.complexity_keywords.contains(&"api".to_string()));
    }
}
