use serde::{Deserialize, Serialize};

/// How winning votes are weighed in a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TallyMode {
    /// Sum of vote confidences.
    #[default]
    Weighted,
    /// One vote, one point.
    Count,
}

/// Decision engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum winning share (voting) or support ratio (building), `0.0..=1.0`.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Score added to a solution on each refinement round.
    #[serde(default = "default_refinement_step")]
    pub refinement_step: f64,
    #[serde(default)]
    pub allow_self_vote: bool,
    #[serde(default)]
    pub tally_mode: TallyMode,
    /// Decisions kept in history before the oldest is evicted.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_consensus_threshold() -> f64 {
    0.6
}

fn default_max_iterations() -> usize {
    5
}

fn default_refinement_step() -> f64 {
    0.1
}

fn default_history_limit() -> usize {
    100
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: default_consensus_threshold(),
            max_iterations: default_max_iterations(),
            refinement_step: default_refinement_step(),
            allow_self_vote: false,
            tally_mode: TallyMode::default(),
            history_limit: default_history_limit(),
        }
    }
}
