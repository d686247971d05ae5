//! Collective decision-making for Cohort agents.
//!
//! Two protocols are provided: [`DemocraticVoting`], where every voter casts
//! one confidence-weighted vote for its preferred proposal, and
//! [`ConsensusBuilder`], which iteratively refines a solution until enough
//! participants support it. Finalised decisions are archived in a bounded
//! [`DecisionHistory`].
//!
//! Scoring is pluggable through the [`VoteScorer`] and [`SupportEvaluator`]
//! traits; [`AffinityScorer`] and [`StrictnessEvaluator`] are the defaults.

/// Iterative consensus building.
pub mod building;
/// Decision engine configuration.
pub mod config;
/// Decisions, votes and decision history.
pub mod decision;
/// Democratic voting.
pub mod voting;

pub use building::{
    ConsensusBuilder, ConsensusOutcome, Participant, Solution, Stance, StrictnessEvaluator,
    SupportEvaluator,
};
pub use config::{ConsensusConfig, TallyMode};
pub use decision::{Decision, DecisionHistory, DecisionType, Vote};
pub use voting::{AffinityScorer, DemocraticVoting, Proposal, VoteScorer, Voter};
