//! Agent selection policies.
//!
//! Every strategy is a pure function over a task and an ordered candidate
//! list. Ties always resolve to the earliest candidate, so callers control
//! fairness through the order they pass in.

use cohort_core::{Agent, Task};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scores how loaded an agent is; lower is better.
pub trait LoadScorer: Send + Sync {
    fn load(&self, agent: &Agent) -> f64;
}

/// `queue_weight × queue_length + active_weight × has_active_task`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedLoadScorer {
    pub queue_weight: f64,
    pub active_weight: f64,
}

impl Default for WeightedLoadScorer {
    fn default() -> Self {
        Self {
            queue_weight: 2.0,
            active_weight: 3.0,
        }
    }
}

impl LoadScorer for WeightedLoadScorer {
    fn load(&self, agent: &Agent) -> f64 {
        let active = if agent.has_active_task() { 1.0 } else { 0.0 };
        self.queue_weight * agent.queue_len() as f64 + self.active_weight * active
    }
}

/// How the orchestrator picks an agent for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Exact agent type match first, otherwise the first candidate.
    #[default]
    Specialized,
    /// Shortest queue.
    LeastBusy,
    /// First candidate; the caller rotates the list between calls.
    RoundRobin,
    /// Lowest [`LoadScorer`] value.
    LoadBalanced,
}

impl AssignmentStrategy {
    /// Pick a recipient among `candidates`, or `None` when the list is empty.
    pub fn select<'a>(
        &self,
        task: &Task,
        candidates: &'a [Arc<Agent>],
        scorer: &dyn LoadScorer,
    ) -> Option<&'a Arc<Agent>> {
        match self {
            AssignmentStrategy::Specialized => task
                .required_type
                .and_then(|wanted| candidates.iter().find(|a| a.agent_type() == wanted))
                .or_else(|| candidates.first()),
            AssignmentStrategy::LeastBusy => candidates.iter().min_by_key(|a| a.queue_len()),
            AssignmentStrategy::RoundRobin => candidates.first(),
            AssignmentStrategy::LoadBalanced => candidates
                .iter()
                .map(|a| (a, scorer.load(a)))
                .min_by(|(_, x), (_, y)| x.total_cmp(y))
                .map(|(a, _)| a),
        }
    }

    /// All strategies, in declaration order.
    pub fn all() -> [AssignmentStrategy; 4] {
        [
            AssignmentStrategy::Specialized,
            AssignmentStrategy::LeastBusy,
            AssignmentStrategy::RoundRobin,
            AssignmentStrategy::LoadBalanced,
        ]
    }
}

impl std::fmt::Display for AssignmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentStrategy::Specialized => write!(f, "specialized"),
            AssignmentStrategy::LeastBusy => write!(f, "least_busy"),
            AssignmentStrategy::RoundRobin => write!(f, "round_robin"),
            AssignmentStrategy::LoadBalanced => write!(f, "load_balanced"),
        }
    }
}

impl std::str::FromStr for AssignmentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "specialized" => Ok(AssignmentStrategy::Specialized),
            "least_busy" => Ok(AssignmentStrategy::LeastBusy),
            "round_robin" => Ok(AssignmentStrategy::RoundRobin),
            "load_balanced" => Ok(AssignmentStrategy::LoadBalanced),
            other => Err(format!(
                "Unknown assignment strategy: {other}. Valid: specialized, least_busy, round_robin, load_balanced"
            )),
        }
    }
}

/// Agents that are available and hold every capability the task requires,
/// in the given order.
pub fn compatible_candidates(task: &Task, agents: &[Arc<Agent>]) -> Vec<Arc<Agent>> {
    agents
        .iter()
        .filter(|a| a.is_available() && a.capabilities().satisfies(&task.required_capabilities))
        .cloned()
        .collect()
}

/// `agents` rotated so that index `start` (mod len) comes first.
pub fn rotated(agents: &[Arc<Agent>], start: usize) -> Vec<Arc<Agent>> {
    if agents.is_empty() {
        return Vec::new();
    }
    let start = start % agents.len();
    agents[start..]
        .iter()
        .chain(agents[..start].iter())
        .cloned()
        .collect()
}
