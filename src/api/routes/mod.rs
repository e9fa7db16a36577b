//! Route handlers for the invocation API
//!
//! Handlers are organized by concern:
//! - [`invoke`] — Process/finalize invocation endpoints (continuation targets)
//! - [`tasks`] — Starting, inspecting and resuming tasks
//! - [`system`] — Health and the event stream

use crate::types::{Identity, TaskId};
use serde::{Deserialize, Serialize};

mod invoke;
mod system;
mod tasks;

pub use invoke::*;
pub use system::*;
pub use tasks::*;

/// Reply to an accepted invocation
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct QueuedResponse {
    /// Task the invocation belongs to
    pub task_id: TaskId,
    /// `process` or `finalize`
    pub target: String,
    /// Always true; the turn runs on the chain runner
    pub queued: bool,
}

/// Reply to `POST /tasks`
#[derive(Debug, Deserialize, Serialize)]
pub struct StartTaskResponse {
    /// Id of the created task
    pub task_id: TaskId,
}

/// Query parameters for `GET /tasks`
#[derive(Debug, Deserialize, Serialize)]
pub struct ListTasksQuery {
    /// Maximum number of tasks to return (default: 50)
    pub limit: Option<i64>,
}

/// Optional body of `POST /tasks/:id/resume`
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ResumeRequest {
    /// Identity the resumed chain acts for (default: the API operator)
    #[serde(default)]
    pub identity: Option<Identity>,
}
