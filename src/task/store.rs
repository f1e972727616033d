//! In-memory task store.
//!
//! The store is the sole owner of every [`Task`]. Callers get snapshots
//! (clones) and mutate only through [`TaskStore::update`], so a reader never
//! sees a half-applied change. Orchestrator runs are serialized per task via
//! [`RunGuard`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;

use super::task::{Task, TaskId, TaskState};

/// Request-level failures, returned to the caller and never stored in a task.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task is not awaiting clarification. Current state: {state}")]
    Conflict { id: TaskId, state: TaskState },

    #[error("Task {0} already has a run in flight")]
    AlreadyRunning(TaskId),

    #[error("{0} not configured")]
    Configuration(String),
}

/// Process-wide task store.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    running: Arc<Mutex<HashSet<TaskId>>>,
}

/// Shared task store wrapped in Arc for concurrent access.
pub type SharedTaskStore = Arc<TaskStore>;

/// Exclusive right to run the orchestrator for one task.
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunGuard {
    id: TaskId,
    running: Arc<Mutex<HashSet<TaskId>>>,
}

impl RunGuard {
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.id);
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created task.
    pub async fn insert(&self, task: Task) -> TaskId {
        let id = task.id;
        self.tasks.write().await.insert(id, task);
        id
    }

    /// Snapshot of a task.
    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Snapshots of every task, newest first.
    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<Task> = tasks.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Apply `f` to a task in place under the write lock.
    pub async fn update<F, R>(&self, id: TaskId, f: F) -> Result<R, TaskError>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        Ok(f(task))
    }

    pub fn is_running(&self, id: TaskId) -> bool {
        self.running_set().contains(&id)
    }

    /// Claim the single run slot for a task.
    pub async fn claim_run(&self, id: TaskId) -> Result<RunGuard, TaskError> {
        let tasks = self.tasks.read().await;
        if !tasks.contains_key(&id) {
            return Err(TaskError::NotFound(id));
        }
        self.try_claim(id)
    }

    /// Accept a clarification: atomically checks the task is awaiting one and
    /// idle, stores the new working query, commits the back-edge into
    /// `Clarifying`, and returns the run slot for the resumed run.
    pub async fn begin_resume(
        &self,
        id: TaskId,
        clarification: impl Into<String>,
    ) -> Result<RunGuard, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;

        let state = task.state();
        if state != TaskState::AwaitingClarification {
            return Err(TaskError::Conflict { id, state });
        }

        let guard = self.try_claim(id)?;
        if task.transition(TaskState::Clarifying).is_err() {
            return Err(TaskError::Conflict { id, state });
        }
        task.clarified_query = clarification.into();
        Ok(guard)
    }

    fn try_claim(&self, id: TaskId) -> Result<RunGuard, TaskError> {
        let mut running = self.running_set();
        if !running.insert(id) {
            return Err(TaskError::AlreadyRunning(id));
        }
        Ok(RunGuard {
            id,
            running: Arc::clone(&self.running),
        })
    }

    fn running_set(&self) -> std::sync::MutexGuard<'_, HashSet<TaskId>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}
