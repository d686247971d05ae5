use crate::task::Task;
use crate::{CohortError, CohortResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result map produced by a successful task execution.
pub type TaskOutput = serde_json::Map<String, serde_json::Value>;

/// The work an [`Agent`](crate::Agent) performs for a task.
///
/// Implementations return errors instead of catching them; the orchestrator
/// converts any error (or panic) into a failed attempt at the task boundary.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> CohortResult<TaskOutput>;
}

/// The `{success, data | error}` envelope returned by external tools that an
/// executor may wrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Convert into an executor result. Object payloads become the output map;
    /// anything else is stored under `"data"`.
    pub fn into_output(self) -> CohortResult<TaskOutput> {
        if !self.success {
            return Err(CohortError::Agent(
                self.error.unwrap_or_else(|| "tool reported failure".to_string()),
            ));
        }
        match self.data {
            Some(serde_json::Value::Object(map)) => Ok(map),
            Some(other) => {
                let mut map = TaskOutput::new();
                map.insert("data".to_string(), other);
                Ok(map)
            }
            None => Ok(TaskOutput::new()),
        }
    }
}
