use chrono::{DateTime, Utc};
use cohort_core::{Agent, AgentId, AgentSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one health sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub healthy: usize,
    /// Agents in `Error` or `Stopped`.
    pub degraded: Vec<AgentSnapshot>,
    /// Agents that were degraded last sweep and are healthy now.
    pub recovered: Vec<AgentId>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// Periodic agent health checks.
///
/// Observational only: degraded agents are logged and reported, never
/// restarted. Reset happens externally via [`Agent::reset`].
#[derive(Debug, Default)]
pub struct HealthMonitor {
    degraded: HashSet<AgentId>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every agent and log the unhealthy ones.
    pub fn check(&mut self, agents: &[Arc<Agent>]) -> HealthReport {
        let mut degraded = Vec::new();
        let mut still_degraded = HashSet::new();
        let mut recovered = Vec::new();

        for agent in agents {
            if agent.is_healthy() {
                if self.degraded.contains(&agent.id()) {
                    info!(agent = %agent.name(), "Agent recovered");
                    recovered.push(agent.id());
                }
                continue;
            }
            let snapshot = agent.snapshot();
            warn!(
                agent = %agent.name(),
                status = %snapshot.status,
                error = agent.last_error().as_deref().unwrap_or(""),
                "Agent unhealthy"
            );
            still_degraded.insert(agent.id());
            degraded.push(snapshot);
        }

        self.degraded = still_degraded;
        HealthReport {
            checked_at: Utc::now(),
            healthy: agents.len() - degraded.len(),
            degraded,
            recovered,
        }
    }

    /// Agents flagged by the most recent sweep.
    pub fn degraded_ids(&self) -> &HashSet<AgentId> {
        &self.degraded
    }
}
