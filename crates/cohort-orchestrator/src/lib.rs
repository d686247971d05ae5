//! Task distribution, agent execution loops and task decomposition for Cohort.
//!
//! The [`Orchestrator`] owns an agent registry and the pending, active,
//! completed and failed task lists. It drives them with a distribution loop,
//! one execution loop per agent and a periodic health check. The
//! [`HierarchicalDecomposer`] turns a complex task into dependency-ordered
//! stages of subtasks.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Registry owner and loop driver.
//! - [`AssignmentStrategy`]: Specialized, least-busy, round-robin or load-balanced selection.
//! - [`TaskQueue`]: Pending list with stable priority ordering.
//! - [`HealthMonitor`]: Observational agent health sweep.
//! - [`HierarchicalDecomposer`]: Complexity scoring and phase decomposition.
//! - [`ExecutionPlan`]: Kahn-layered stages of subtasks.

/// Agent selection strategies and load scoring.
pub mod assignment;
/// Orchestrator and decomposer configuration.
pub mod config;
/// Complexity scoring, phase patterns and execution plans.
pub mod decomposer;
/// The orchestrator and its loops.
pub mod engine;
/// Agent health monitoring.
pub mod monitor;
/// Pending task list.
pub mod task_queue;
/// Status snapshot types.
pub mod types;

pub use assignment::{AssignmentStrategy, LoadScorer, WeightedLoadScorer};
pub use config::{DecomposerConfig, OrchestratorConfig};
pub use decomposer::{DecompositionKind, ExecutionPlan, HierarchicalDecomposer, TaskDecomposition};
pub use engine::Orchestrator;
pub use monitor::{HealthMonitor, HealthReport};
pub use task_queue::TaskQueue;
pub use types::{AgentSummary, StatusSnapshot, TaskSummary};
