//! Public status projection.

use serde::{Deserialize, Serialize};

use super::store::{TaskError, TaskStore};
use super::task::{Task, TaskId, TaskState};

/// Public status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    Running,
    PausedForClarification,
    Completed,
    Failed,
}

impl From<TaskState> for PublicStatus {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::AwaitingClarification => Self::PausedForClarification,
            TaskState::Completed => Self::Completed,
            TaskState::Error => Self::Failed,
            _ => Self::Running,
        }
    }
}

impl std::fmt::Display for PublicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::PausedForClarification => write!(f, "paused_for_clarification"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Response body of a status query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub status: PublicStatus,
    pub data: serde_json::Value,
}

/// Compact row for task listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub status: PublicStatus,
    pub current_state: TaskState,
    pub initial_query: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.state().into(),
            current_state: task.state(),
            initial_query: task.initial_query.clone(),
            created_at: task.created_at,
        }
    }
}

/// Project a task snapshot into its public form.
///
/// A completed task also exposes its report as a CSV data URL under
/// `data.result`. Attribute processing metadata is never serialized.
pub fn project(task: &Task) -> TaskStatusResponse {
    let mut data = serde_json::to_value(task).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize task {}: {}", task.id, e);
        serde_json::json!({ "current_state": task.state().name() })
    });

    if task.state() == TaskState::Completed {
        if let (Some(output), Some(map)) = (&task.formatted_output, data.as_object_mut()) {
            map.insert(
                "result".to_string(),
                serde_json::Value::String(format!("data:text/csv;charset=utf-8,{}", output)),
            );
        }
    }

    TaskStatusResponse {
        task_id: task.id,
        status: task.state().into(),
        data,
    }
}

impl TaskStore {
    /// Public status of one task.
    pub async fn status(&self, id: TaskId) -> Result<TaskStatusResponse, TaskError> {
        self.get(id)
            .await
            .map(|task| project(&task))
            .ok_or(TaskError::NotFound(id))
    }

    /// Listing rows for every task, newest first.
    pub async fn summaries(&self) -> Vec<TaskSummary> {
        self.list().await.iter().map(TaskSummary::from).collect()
    }
}
