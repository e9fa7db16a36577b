//! Per-status counter updates on the tasks row.

use crate::error::DatabaseError;
use crate::types::{StatsDelta, TaskId, TaskStats, TaskStatus};
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Move one sub-task between stats buckets
    ///
    /// A single UPDATE decrements `previous` and increments `next`, so concurrent
    /// deltas never lose counts. The first delta on a PENDING task also moves the
    /// task to PROCESSING. Finalize fixes the counters, so deltas that arrive
    /// after it are ignored.
    pub async fn apply_stats_delta(&self, task_id: TaskId, delta: StatsDelta) -> Result<()> {
        if delta.previous == delta.next {
            return Ok(());
        }

        let sql = format!(
            r#"
            UPDATE tasks SET
                {prev} = {prev} - 1,
                {next} = {next} + 1,
                status = CASE WHEN status = ? THEN ? ELSE status END,
                updated_at = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
            prev = delta.previous.stats_column(),
            next = delta.next.stats_column(),
        );

        let result = sqlx::query(&sql)
            .bind(TaskStatus::Pending.to_i32())
            .bind(TaskStatus::Processing.to_i32())
            .bind(chrono::Utc::now().timestamp())
            .bind(task_id)
            .bind(TaskStatus::Pending.to_i32())
            .bind(TaskStatus::Processing.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update stats ({} -> {}): {}",
                    delta.previous, delta.next, e
                )))
            })?;

        if result.rows_affected() == 0 {
            if self.get_task_row(task_id).await?.is_none() {
                return Err(Error::Database(DatabaseError::NotFound(format!(
                    "task {}",
                    task_id
                ))));
            }
            tracing::debug!(task_id = task_id.0, "ignoring stats delta for finalized task");
        }

        Ok(())
    }

    /// Current counters of a task
    pub async fn get_stats(&self, task_id: TaskId) -> Result<Option<TaskStats>> {
        Ok(self.get_task_row(task_id).await?.map(|row| row.stats()))
    }
}
