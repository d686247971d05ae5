//! Core types and error definitions for the Cohort scheduling engine.
//!
//! This crate provides the foundational types shared across all Cohort crates:
//! the unified error type, the task and agent data model with their state
//! machines, and the executor contract that every worker plugs into.
//!
//! # Main types
//!
//! - [`CohortError`]: Unified error enum for all Cohort subsystems.
//! - [`CohortResult`]: Convenience alias for `Result<T, CohortError>`.
//! - [`Task`]: A unit of work with priority, status, dependencies and payload.
//! - [`TaskStatus`]: The task state machine.
//! - [`Agent`]: A worker with a capability set, a bounded queue and an executor.
//! - [`TaskExecutor`]: The pluggable execution strategy behind an [`Agent`].

/// Worker agents, capability sets and rolling metrics.
pub mod agent;
/// Task model and state machine.
pub mod task;
/// Executor contract and tool outcome envelope.
pub mod tool;

pub use agent::{
    Agent, AgentCapabilities, AgentId, AgentMetrics, AgentSnapshot, AgentStatus, AgentType,
};
pub use task::{FailureOutcome, Task, TaskId, TaskPriority, TaskStatus};
pub use tool::{TaskExecutor, TaskOutput, ToolOutcome};

use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Cohort engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    /// An error raised by an agent or its executor while running a task.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error in task construction or bookkeeping.
    #[error("Task error: {0}")]
    Task(String),

    /// A status change that the task state machine does not allow.
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the task was in.
        from: TaskStatus,
        /// Status that was requested.
        to: TaskStatus,
    },

    /// A task was asked to depend on itself.
    #[error("Task {0} cannot depend on itself")]
    SelfDependency(Uuid),

    /// An error from the orchestrator registries or loops.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error while decomposing a task.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// An error from the decision engine (e.g. voting on a finalized decision).
    #[error("Consensus error: {0}")]
    Consensus(String),

    /// A crew-level failure that aborts the current run.
    #[error("Crew error: {0}")]
    Crew(String),

    /// The crew or orchestrator has no agents to work with.
    #[error("No agents available")]
    NoAgents,

    /// The crew can make no further progress with its current task set.
    #[error("Crew stalled: {0}")]
    Stalled(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CohortError`].
pub type CohortResult<T> = Result<T, CohortError>;
