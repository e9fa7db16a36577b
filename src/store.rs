//! Storage seams used by the chain orchestrator
//!
//! The orchestrator only talks to these traits, never to [`Database`] directly,
//! so tests can swap in stores that lag or fail. [`Database`] is the production
//! implementation of both.

use crate::db::Database;
use crate::types::{StatsDelta, SubTask, SubTaskStatus, SubTaskUpdate, TaskId};
use crate::Result;
use async_trait::async_trait;

/// Point reads and writes of sub-task records
#[async_trait]
pub trait SubTaskStore: Send + Sync {
    /// Read a sub-task by its zero-padded id
    ///
    /// Returns `Ok(None)` when no record exists at that id.
    async fn get_sub_task(&self, task_id: TaskId, sub_task_id: &str) -> Result<Option<SubTask>>;

    /// Apply a partial update and return the stored record
    async fn update_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        update: SubTaskUpdate,
    ) -> Result<SubTask>;

    /// Apply a partial update only while the sub-task is in `from`
    ///
    /// Returns `Ok(None)` when the sub-task was not in `from`, which means some
    /// other turn got there first.
    async fn claim_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        from: SubTaskStatus,
        update: SubTaskUpdate,
    ) -> Result<Option<SubTask>>;
}

/// Per-task status counters
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Atomically move one count from `delta.previous` to `delta.next`
    async fn apply_delta(&self, task_id: TaskId, delta: StatsDelta) -> Result<()>;
}

#[async_trait]
impl SubTaskStore for Database {
    async fn get_sub_task(&self, task_id: TaskId, sub_task_id: &str) -> Result<Option<SubTask>> {
        Database::get_sub_task(self, task_id, sub_task_id).await
    }

    async fn update_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        update: SubTaskUpdate,
    ) -> Result<SubTask> {
        Database::update_sub_task(self, task_id, sub_task_id, &update).await
    }

    async fn claim_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        from: SubTaskStatus,
        update: SubTaskUpdate,
    ) -> Result<Option<SubTask>> {
        self.transition_sub_task(task_id, sub_task_id, from, &update)
            .await
    }
}

#[async_trait]
impl StatsStore for Database {
    async fn apply_delta(&self, task_id: TaskId, delta: StatsDelta) -> Result<()> {
        self.apply_stats_delta(task_id, delta).await
    }
}
