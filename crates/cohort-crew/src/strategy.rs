//! Crew strategies and the per-strategy performance ledger that drives
//! adaptation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How the crew hands ready tasks to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrewStrategy {
    /// Agents vote on who takes each task.
    Democratic,
    /// Several agents race on the same task; the first success wins.
    Competitive,
    /// A management agent delegates to specialists.
    Hierarchical,
    /// Switch between the other three based on observed performance.
    Adaptive,
}

impl CrewStrategy {
    /// The strategies adaptation chooses between, in tie-break order.
    pub fn concrete() -> [CrewStrategy; 3] {
        [
            CrewStrategy::Democratic,
            CrewStrategy::Competitive,
            CrewStrategy::Hierarchical,
        ]
    }
}

impl std::fmt::Display for CrewStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrewStrategy::Democratic => write!(f, "democratic"),
            CrewStrategy::Competitive => write!(f, "competitive"),
            CrewStrategy::Hierarchical => write!(f, "hierarchical"),
            CrewStrategy::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl std::str::FromStr for CrewStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "democratic" => Ok(CrewStrategy::Democratic),
            "competitive" => Ok(CrewStrategy::Competitive),
            "hierarchical" => Ok(CrewStrategy::Hierarchical),
            "adaptive" => Ok(CrewStrategy::Adaptive),
            other => Err(format!(
                "Unknown crew strategy: {other}. Valid: democratic, competitive, hierarchical, adaptive"
            )),
        }
    }
}

/// Score given to a strategy that has not run yet, so adaptation tries it.
pub const UNTRIED_SCORE: f64 = 1.0;

/// Accumulated outcomes of task attempts under one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub attempts: u64,
    pub successes: u64,
    pub total_latency_secs: f64,
}

impl StrategyStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    pub fn avg_latency_secs(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_latency_secs / self.attempts as f64
        }
    }

    /// `0.7 × success_rate + 0.3 / (1 + avg_latency_secs)`, or
    /// [`UNTRIED_SCORE`] with no attempts.
    pub fn score(&self) -> f64 {
        if self.attempts == 0 {
            return UNTRIED_SCORE;
        }
        0.7 * self.success_rate() + 0.3 / (1.0 + self.avg_latency_secs())
    }
}

/// One row of [`StrategyLedger::report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyScore {
    pub strategy: CrewStrategy,
    pub attempts: u64,
    pub success_rate: f64,
    pub avg_latency_secs: f64,
    pub score: f64,
}

/// Per-strategy statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyLedger {
    stats: BTreeMap<CrewStrategy, StrategyStats>,
}

impl StrategyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, strategy: CrewStrategy, success: bool, latency: Duration) {
        let entry = self.stats.entry(strategy).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
        entry.total_latency_secs += latency.as_secs_f64();
    }

    pub fn stats(&self, strategy: CrewStrategy) -> StrategyStats {
        self.stats.get(&strategy).copied().unwrap_or_default()
    }

    pub fn score(&self, strategy: CrewStrategy) -> f64 {
        self.stats(strategy).score()
    }

    /// Highest-scoring concrete strategy; earlier ones win ties.
    pub fn best(&self) -> CrewStrategy {
        CrewStrategy::concrete()
            .into_iter()
            .fold(None, |best: Option<(CrewStrategy, f64)>, s| {
                let score = self.score(s);
                match best {
                    Some((_, b)) if score <= b => best,
                    _ => Some((s, score)),
                }
            })
            .map_or(CrewStrategy::Hierarchical, |(s, _)| s)
    }

    pub fn report(&self) -> Vec<StrategyScore> {
        CrewStrategy::concrete()
            .into_iter()
            .map(|strategy| {
                let stats = self.stats(strategy);
                StrategyScore {
                    strategy,
                    attempts: stats.attempts,
                    success_rate: stats.success_rate(),
                    avg_latency_secs: stats.avg_latency_secs(),
                    score: stats.score(),
                }
            })
            .collect()
    }
}
