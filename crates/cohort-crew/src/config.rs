use crate::strategy::CrewStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Crew controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Wall-clock budget, checked between iterations.
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    #[serde(default = "default_strategy")]
    pub strategy: CrewStrategy,
    /// Starting point when `strategy` is `adaptive`.
    #[serde(default = "default_initial_strategy")]
    pub initial_strategy: CrewStrategy,
    /// Iterations between strategy re-evaluations.
    #[serde(default = "default_adaptation_interval")]
    pub adaptation_interval: usize,
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    #[serde(default)]
    pub require_completion_vote: bool,
    #[serde(default = "default_true")]
    pub vote_on_decomposition: bool,
    #[serde(default = "default_true")]
    pub auto_recovery: bool,
    /// Started tasks older than this are reset during recovery.
    #[serde(default = "default_stale_task_secs")]
    pub stale_task_secs: u64,
    /// Agents racing on the same task under the competitive strategy.
    #[serde(default = "default_competitive_fanout")]
    pub competitive_fanout: usize,
}

fn default_max_iterations() -> usize {
    50
}

fn default_strategy() -> CrewStrategy {
    CrewStrategy::Adaptive
}

fn default_initial_strategy() -> CrewStrategy {
    CrewStrategy::Hierarchical
}

fn default_adaptation_interval() -> usize {
    3
}

fn default_consensus_threshold() -> f64 {
    0.6
}

fn default_true() -> bool {
    true
}

fn default_stale_task_secs() -> u64 {
    300
}

fn default_competitive_fanout() -> usize {
    2
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_runtime_secs: None,
            strategy: default_strategy(),
            initial_strategy: default_initial_strategy(),
            adaptation_interval: default_adaptation_interval(),
            consensus_threshold: default_consensus_threshold(),
            require_completion_vote: false,
            vote_on_decomposition: true,
            auto_recovery: true,
            stale_task_secs: default_stale_task_secs(),
            competitive_fanout: default_competitive_fanout(),
        }
    }
}

impl CrewConfig {
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_task_secs).unwrap_or(i64::MAX))
    }

    /// The concrete strategy a run starts with.
    pub fn starting_strategy(&self) -> CrewStrategy {
        match self.strategy {
            CrewStrategy::Adaptive => match self.initial_strategy {
                CrewStrategy::Adaptive => CrewStrategy::Hierarchical,
                other => other,
            },
            fixed => fixed,
        }
    }
}
