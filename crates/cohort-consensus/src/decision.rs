use crate::config::TallyMode;
use chrono::{DateTime, Utc};
use cohort_core::{AgentId, CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// What a decision is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Architecture,
    Strategy,
    TaskAssignment,
    Decomposition,
    Completion,
    General,
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionType::Architecture => "architecture",
            DecisionType::Strategy => "strategy",
            DecisionType::TaskAssignment => "task_assignment",
            DecisionType::Decomposition => "decomposition",
            DecisionType::Completion => "completion",
            DecisionType::General => "general",
        };
        write!(f, "{s}")
    }
}

/// One agent's choice in a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: AgentId,
    pub option: String,
    /// Clamped to `0.0..=1.0`.
    pub confidence: f64,
    pub reasoning: String,
}

impl Vote {
    pub fn new(
        voter: AgentId,
        option: impl Into<String>,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            voter,
            option: option.into(),
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            },
            reasoning: reasoning.into(),
        }
    }
}

/// A collective choice point.
///
/// Votes can be added and the decision re-tallied until a tally reaches
/// consensus; after that the decision is frozen and every mutation returns
/// [`CohortError::Consensus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub decision_type: DecisionType,
    pub question: String,
    options: Vec<String>,
    votes: Vec<Vote>,
    winner: Option<String>,
    consensus_reached: bool,
    confidence_score: f64,
    pub created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

impl Decision {
    /// Duplicate options are dropped, keeping the first occurrence.
    pub fn new<S: Into<String>>(
        decision_type: DecisionType,
        question: impl Into<String>,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for option in options {
            let option = option.into();
            if !unique.contains(&option) {
                unique.push(option);
            }
        }
        Self {
            id: Uuid::new_v4(),
            decision_type,
            question: question.into(),
            options: unique,
            votes: Vec::new(),
            winner: None,
            consensus_reached: false,
            confidence_score: 0.0,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn consensus_reached(&self) -> bool {
        self.consensus_reached
    }

    /// Mean confidence of the winning votes; 0 without a winner.
    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        self.decided_at
    }

    pub fn is_degenerate(&self) -> bool {
        self.decided_at.is_some() && self.winner.is_none()
    }

    fn ensure_open(&self) -> CohortResult<()> {
        if self.consensus_reached {
            return Err(CohortError::Consensus(format!(
                "Decision {} already reached consensus",
                self.id
            )));
        }
        Ok(())
    }

    /// Add a vote. Each voter votes once, for a known option.
    pub fn cast_vote(&mut self, vote: Vote) -> CohortResult<()> {
        self.ensure_open()?;
        if !self.options.contains(&vote.option) {
            return Err(CohortError::Consensus(format!(
                "Unknown option '{}' for decision {}",
                vote.option, self.id
            )));
        }
        if self.votes.iter().any(|v| v.voter == vote.voter) {
            return Err(CohortError::Consensus(format!(
                "Agent {} already voted on decision {}",
                vote.voter, self.id
            )));
        }
        self.votes.push(vote);
        Ok(())
    }

    /// Weight per option in option order.
    pub fn option_weights(&self, mode: TallyMode) -> Vec<(String, f64)> {
        self.options
            .iter()
            .map(|option| {
                let weight = self
                    .votes
                    .iter()
                    .filter(|v| &v.option == option)
                    .map(|v| match mode {
                        TallyMode::Weighted => v.confidence,
                        TallyMode::Count => 1.0,
                    })
                    .sum();
                (option.clone(), weight)
            })
            .collect()
    }

    /// Count the votes and decide.
    ///
    /// The option with the highest weight among those that received votes
    /// wins; ties go to the earlier option. Consensus is reached when the
    /// winner's share of all votes cast is at least `threshold`. With no
    /// options or no votes the decision is degenerate: no winner, no
    /// consensus, zero confidence.
    pub fn tally(&mut self, mode: TallyMode, threshold: f64) -> CohortResult<()> {
        self.ensure_open()?;
        self.decided_at = Some(Utc::now());

        if self.options.is_empty() || self.votes.is_empty() {
            self.winner = None;
            self.consensus_reached = false;
            self.confidence_score = 0.0;
            return Ok(());
        }

        let mut best: Option<(String, f64)> = None;
        for (option, weight) in self.option_weights(mode) {
            if !self.votes.iter().any(|v| v.option == option) {
                continue;
            }
            match &best {
                Some((_, best_weight)) if weight <= *best_weight => {}
                _ => best = Some((option, weight)),
            }
        }

        let Some((winner, _)) = best else {
            self.winner = None;
            self.consensus_reached = false;
            self.confidence_score = 0.0;
            return Ok(());
        };

        let winning: Vec<&Vote> = self.votes.iter().filter(|v| v.option == winner).collect();
        let share = winning.len() as f64 / self.votes.len() as f64;
        self.confidence_score =
            winning.iter().map(|v| v.confidence).sum::<f64>() / winning.len() as f64;
        self.consensus_reached = share >= threshold;
        self.winner = Some(winner);
        Ok(())
    }
}

/// Bounded archive of finalised decisions, oldest evicted first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionHistory {
    limit: usize,
    decisions: VecDeque<Decision>,
}

impl Default for DecisionHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl DecisionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            decisions: VecDeque::new(),
        }
    }

    pub fn record(&mut self, decision: Decision) {
        if self.decisions.len() == self.limit {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision);
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter()
    }

    pub fn latest(&self) -> Option<&Decision> {
        self.decisions.back()
    }

    pub fn of_type(&self, decision_type: DecisionType) -> impl Iterator<Item = &Decision> {
        self.decisions
            .iter()
            .filter(move |d| d.decision_type == decision_type)
    }

    pub fn count_by_type(&self) -> BTreeMap<DecisionType, usize> {
        let mut counts = BTreeMap::new();
        for decision in &self.decisions {
            *counts.entry(decision.decision_type).or_insert(0) += 1;
        }
        counts
    }

    /// Fraction of archived decisions that reached consensus.
    pub fn consensus_rate(&self) -> f64 {
        if self.decisions.is_empty() {
            return 0.0;
        }
        let reached = self
            .decisions
            .iter()
            .filter(|d| d.consensus_reached())
            .count();
        reached as f64 / self.decisions.len() as f64
    }
}
