use cohort_core::AgentType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Agent counts in a [`StatusSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub total: usize,
    pub available: usize,
    pub by_type: BTreeMap<AgentType, usize>,
}

/// Task counts in a [`StatusSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Waiting in the orchestrator's pending list.
    pub pending: usize,
    /// Assigned and waiting in some agent's queue.
    pub queued: usize,
    /// Currently executing.
    pub active: usize,
    pub completed: usize,
    /// Permanently failed or timed out.
    pub failed: usize,
    pub cancelled: usize,
}

/// Result of `get_status()`. Two snapshots of an unchanged orchestrator are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub agents: AgentSummary,
    pub tasks: TaskSummary,
}

impl StatusSnapshot {
    /// Nothing pending, queued or running.
    pub fn is_idle(&self) -> bool {
        self.tasks.pending == 0 && self.tasks.queued == 0 && self.tasks.active == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serialization_shape() {
        let mut snapshot = StatusSnapshot::default();
        snapshot.agents.total = 2;
        snapshot.agents.by_type.insert(AgentType::Testing, 2);
        snapshot.tasks.completed = 5;

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["agents"]["total"], 2);
        assert_eq!(json["agents"]["by_type"]["testing"], 2);
        assert_eq!(json["tasks"]["completed"], 5);
        assert!(snapshot.is_idle());
    }
}
