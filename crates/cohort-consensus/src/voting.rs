//! Democratic voting over a set of proposals.

use crate::config::ConsensusConfig;
use crate::decision::{Decision, DecisionType, Vote};
use cohort_core::{Agent, AgentId, AgentType};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info};

/// An option put up for a vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Option identifier; becomes the decision's option string.
    pub id: String,
    pub description: String,
    /// Agent type the proposal is aimed at, if any.
    pub kind: Option<AgentType>,
    pub proposer: Option<AgentId>,
    pub base_score: f64,
    /// Concrete steps or parts; its length is the proposal's size.
    #[serde(default)]
    pub items: Vec<String>,
}

impl Proposal {
    pub fn new(id: impl Into<String>, base_score: f64) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            kind: None,
            proposer: None,
            base_score,
            items: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_kind(mut self, kind: AgentType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_proposer(mut self, proposer: AgentId) -> Self {
        self.proposer = Some(proposer);
        self
    }

    pub fn with_items<S: Into<String>>(mut self, items: impl IntoIterator<Item = S>) -> Self {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }
}

/// A member of the voting pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    pub id: AgentId,
    pub name: String,
    pub kind: AgentType,
}

impl Voter {
    pub fn new(id: AgentId, name: impl Into<String>, kind: AgentType) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }
}

impl From<&Agent> for Voter {
    fn from(agent: &Agent) -> Self {
        Self::new(agent.id(), agent.name(), agent.agent_type())
    }
}

/// How much a voter likes a proposal. Higher is better; may be negative.
pub trait VoteScorer: Send + Sync {
    fn score(&self, voter: &Voter, proposal: &Proposal) -> f64;
}

/// Base score adjusted for kind affinity, self-proposals and size.
#[derive(Debug, Clone)]
pub struct AffinityScorer {
    pub same_kind_bonus: f64,
    pub self_proposal_penalty: f64,
    pub moderate_size_bonus: f64,
    pub moderate_size: RangeInclusive<usize>,
    pub allow_self_vote: bool,
}

impl AffinityScorer {
    pub fn new(allow_self_vote: bool) -> Self {
        Self {
            same_kind_bonus: 10.0,
            self_proposal_penalty: 5.0,
            moderate_size_bonus: 3.0,
            moderate_size: 3..=7,
            allow_self_vote,
        }
    }
}

impl Default for AffinityScorer {
    fn default() -> Self {
        Self::new(false)
    }
}

impl VoteScorer for AffinityScorer {
    fn score(&self, voter: &Voter, proposal: &Proposal) -> f64 {
        let mut score = proposal.base_score;
        if proposal.kind == Some(voter.kind) {
            score += self.same_kind_bonus;
        }
        if !self.allow_self_vote && proposal.proposer == Some(voter.id) {
            score -= self.self_proposal_penalty;
        }
        if self.moderate_size.contains(&proposal.size()) {
            score += self.moderate_size_bonus;
        }
        score
    }
}

/// One-voter-one-vote decision making over proposals.
pub struct DemocraticVoting {
    config: ConsensusConfig,
    scorer: Arc<dyn VoteScorer>,
}

impl DemocraticVoting {
    /// Uses [`AffinityScorer`] with the config's self-vote setting.
    pub fn new(config: ConsensusConfig) -> Self {
        let scorer = Arc::new(AffinityScorer::new(config.allow_self_vote));
        Self { config, scorer }
    }

    pub fn with_scorer(config: ConsensusConfig, scorer: Arc<dyn VoteScorer>) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Each voter's single vote: its top-scoring proposal (first on ties),
    /// with confidence relative to the best score anywhere in the pool.
    pub fn cast_votes(&self, proposals: &[Proposal], voters: &[Voter]) -> Vec<Vote> {
        if proposals.is_empty() {
            return Vec::new();
        }
        let matrix: Vec<Vec<f64>> = voters
            .iter()
            .map(|voter| {
                proposals
                    .iter()
                    .map(|p| self.scorer.score(voter, p))
                    .collect()
            })
            .collect();
        let pool_max = matrix
            .iter()
            .flatten()
            .fold(0.0_f64, |acc, s| acc.max(s.max(0.0)));

        voters
            .iter()
            .zip(&matrix)
            .filter_map(|(voter, scores)| {
                let (best, score) = scores.iter().copied().enumerate().fold(
                    None,
                    |best: Option<(usize, f64)>, (i, s)| match best {
                        Some((_, b)) if s <= b => best,
                        _ => Some((i, s)),
                    },
                )?;
                let confidence = if pool_max > 0.0 {
                    score.max(0.0) / pool_max
                } else {
                    0.0
                };
                let proposal = &proposals[best];
                debug!(voter = %voter.name, option = %proposal.id, score, confidence, "Vote cast");
                Some(Vote::new(
                    voter.id,
                    proposal.id.clone(),
                    confidence,
                    format!("{} scored {} at {score:.1}", voter.name, proposal.id),
                ))
            })
            .collect()
    }

    /// Run a full vote and tally it with the configured mode and threshold.
    pub fn conduct(
        &self,
        decision_type: DecisionType,
        question: impl Into<String>,
        proposals: &[Proposal],
        voters: &[Voter],
    ) -> Decision {
        let mut decision =
            Decision::new(decision_type, question, proposals.iter().map(|p| p.id.clone()));
        for vote in self.cast_votes(proposals, voters) {
            // Proposal ids are the options and each voter appears once.
            if let Err(e) = decision.cast_vote(vote) {
                debug!(error = %e, "Vote rejected");
            }
        }
        if let Err(e) = decision.tally(self.config.tally_mode, self.config.consensus_threshold) {
            debug!(error = %e, "Tally rejected");
        }
        info!(
            decision_id = %decision.id,
            decision_type = %decision.decision_type,
            winner = decision.winner().unwrap_or("none"),
            votes = decision.votes().len(),
            consensus = decision.consensus_reached(),
            confidence = decision.confidence_score(),
            "Vote concluded"
        );
        decision
    }
}
