//! Task module - research tasks, their lifecycle and storage.
//!
//! - `task`: the task record, its items and the lifecycle state machine
//! - `store`: process-wide keyed store with per-task run serialization
//! - `status`: public status projection served to API callers
//!
//! The lifecycle is enforced in [`Task::transition`]; every other module goes
//! through it, so an illegal edge can never be committed to the store.

#[allow(clippy::module_inception)]
mod task;
mod status;
mod store;

pub use status::{project, PublicStatus, TaskStatusResponse, TaskSummary};
pub use store::{RunGuard, SharedTaskStore, TaskError, TaskStore};
pub use task::{Attribute, Item, StateTransition, Task, TaskId, TaskState, TransitionError};
