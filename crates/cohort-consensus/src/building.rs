//! Iterative consensus building.
//!
//! Starting from the strongest proposal, participants repeatedly evaluate the
//! current solution. Dissent feeds suggestions back into the solution and
//! raises its score until enough participants support it or the iteration
//! cap is hit.

use crate::config::ConsensusConfig;
use cohort_core::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Someone whose support is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: AgentId,
    pub name: String,
    /// Minimum solution score this participant accepts.
    pub strictness: f64,
}

impl Participant {
    pub fn new(id: AgentId, name: impl Into<String>, strictness: f64) -> Self {
        Self {
            id,
            name: name.into(),
            strictness,
        }
    }
}

/// A candidate solution being refined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub id: String,
    pub description: String,
    pub score: f64,
    /// Suggestions folded in during refinement, oldest first.
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Solution {
    pub fn new(id: impl Into<String>, description: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            score,
            suggestions: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A participant's reaction to a solution.
#[derive(Debug, Clone, PartialEq)]
pub enum Stance {
    Support,
    Dissent { suggestion: String },
}

/// Decides whether a participant backs a solution.
pub trait SupportEvaluator: Send + Sync {
    fn evaluate(&self, participant: &Participant, solution: &Solution) -> Stance;
}

/// Supports iff `solution.score >= participant.strictness`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictnessEvaluator;

impl SupportEvaluator for StrictnessEvaluator {
    fn evaluate(&self, participant: &Participant, solution: &Solution) -> Stance {
        if solution.score >= participant.strictness {
            Stance::Support
        } else {
            Stance::Dissent {
                suggestion: format!(
                    "{}: raise quality to at least {:.2}",
                    participant.name, participant.strictness
                ),
            }
        }
    }
}

/// Result of a consensus-building run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    /// Accepted solution, or the best one seen when consensus was not reached.
    pub solution: Option<Solution>,
    pub consensus_reached: bool,
    /// Support ratio backing `solution`.
    pub confidence: f64,
    pub iterations: usize,
}

impl ConsensusOutcome {
    fn degenerate() -> Self {
        Self {
            solution: None,
            consensus_reached: false,
            confidence: 0.0,
            iterations: 0,
        }
    }
}

/// Runs the evaluate, refine, repeat loop.
pub struct ConsensusBuilder {
    config: ConsensusConfig,
    evaluator: Arc<dyn SupportEvaluator>,
}

impl ConsensusBuilder {
    pub fn new(config: ConsensusConfig) -> Self {
        Self::with_evaluator(config, Arc::new(StrictnessEvaluator))
    }

    pub fn with_evaluator(config: ConsensusConfig, evaluator: Arc<dyn SupportEvaluator>) -> Self {
        Self { config, evaluator }
    }

    pub fn build(&self, proposals: &[Solution], participants: &[Participant]) -> ConsensusOutcome {
        if participants.is_empty() {
            return ConsensusOutcome::degenerate();
        }
        let Some(mut current) = proposals.iter().fold(None, |best: Option<&Solution>, s| {
            match best {
                Some(b) if s.score <= b.score => best,
                _ => Some(s),
            }
        })
        .cloned() else {
            return ConsensusOutcome::degenerate();
        };

        let max_iterations = self.config.max_iterations.max(1);
        let mut best: Option<(Solution, f64)> = None;
        let mut last_ratio = 0.0;

        for iteration in 1..=max_iterations {
            let mut supporters = 0;
            let mut suggestions = Vec::new();
            for participant in participants {
                match self.evaluator.evaluate(participant, &current) {
                    Stance::Support => supporters += 1,
                    Stance::Dissent { suggestion } => suggestions.push(suggestion),
                }
            }
            let ratio = supporters as f64 / participants.len() as f64;
            last_ratio = ratio;
            debug!(
                solution = %current.id,
                iteration,
                ratio,
                score = current.score,
                "Consensus round"
            );

            if ratio >= self.config.consensus_threshold {
                current
                    .metadata
                    .insert("support_ratio".to_string(), serde_json::json!(ratio));
                info!(solution = %current.id, iteration, ratio, "Consensus reached");
                return ConsensusOutcome {
                    solution: Some(current),
                    consensus_reached: true,
                    confidence: ratio,
                    iterations: iteration,
                };
            }

            if best.as_ref().map_or(true, |(_, r)| ratio > *r) {
                best = Some((current.clone(), ratio));
            }

            current.suggestions.extend(suggestions);
            current.score += self.config.refinement_step;
        }

        let (mut solution, ratio) = best.unwrap_or((current, last_ratio));
        solution
            .metadata
            .insert("support_ratio".to_string(), serde_json::json!(last_ratio));
        info!(
            solution = %solution.id,
            iterations = max_iterations,
            ratio = last_ratio,
            "Consensus not reached"
        );
        ConsensusOutcome {
            solution: Some(solution),
            consensus_reached: false,
            confidence: ratio,
            iterations: max_iterations,
        }
    }
}
