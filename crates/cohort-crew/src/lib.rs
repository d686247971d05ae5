//! Autonomous crews for the Cohort engine.
//!
//! A [`Crew`] takes a goal, decomposes it with the hierarchical decomposer,
//! hands subtasks out under a democratic, competitive or hierarchical
//! strategy, executes them concurrently and adapts the strategy to observed
//! success rates and latencies. Collective choices along the way (which
//! decomposition, which strategy, whether the goal is done) are made by
//! vote and kept in a decision history.

/// Crew settings.
pub mod config;
/// The crew controller.
pub mod controller;
/// Strategies and their performance ledger.
pub mod strategy;
/// Run results and phases.
pub mod types;

pub use config::CrewConfig;
pub use controller::Crew;
pub use strategy::{CrewStrategy, StrategyLedger, StrategyScore, StrategyStats};
pub use types::{CrewPhase, CrewRunResult, CrewRunStatus, TaskReport};
