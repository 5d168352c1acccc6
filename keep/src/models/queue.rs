use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a pending-queue row in its claim/retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::KeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(crate::error::KeepError::Corruption(format!(
                "unknown pending_queue status {other:?}"
            ))),
        }
    }
}

/// A queued unit of background work, keyed by `(id, collection, task_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: String,
    pub collection: String,
    pub task_type: String,
    pub content: String,
    pub queued_at: String,
    pub attempts: u32,
    pub metadata: HashMap<String, String>,
    pub status: TaskStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub last_error: Option<String>,
    pub retry_after: Option<String>,
}

impl PendingTask {
    /// True when the remote client flagged this task as remote-delegated.
    pub fn is_delegated(&self) -> bool {
        self.metadata.get("_remote_task_id").is_some()
    }

    /// True when `_local_only` disables delegation for this task.
    pub fn is_local_only(&self) -> bool {
        self.metadata
            .get("_local_only")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }
}

/// A dead-lettered task, listed via `list_failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub id: String,
    pub collection: String,
    pub task_type: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub queued_at: String,
}
