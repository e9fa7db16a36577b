//! Task creation, lookup and finalization.

use crate::error::DatabaseError;
use crate::types::{
    FinalizeManifest, MAX_SUB_TASKS, SubTaskStatus, TaskId, TaskInfo, TaskStats, TaskStatus,
    pad_index,
};
use crate::{Error, Result};

use super::{Database, NewTask, TaskRow};

const SELECT_TASK: &str = r#"
    SELECT
        id, job_type, status, total,
        stats_pending, stats_processing, stats_completed, stats_failed,
        created_by, output, created_at, updated_at, finished_at
    FROM tasks
"#;

impl Database {
    /// Insert a task and all of its PENDING sub-tasks in one transaction
    ///
    /// The task starts with `stats_pending == inputs.len()`, so the stats
    /// invariant holds from the first commit.
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        if task.inputs.len() > MAX_SUB_TASKS {
            return Err(Error::Validation(format!(
                "a task holds at most {} sub-tasks, got {}",
                MAX_SUB_TASKS,
                task.inputs.len()
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let total = task.inputs.len() as i64;

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin task transaction: {}",
                e
            )))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                job_type, status, total, stats_pending, created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.job_type.as_str())
        .bind(TaskStatus::Pending.to_i32())
        .bind(total)
        .bind(total)
        .bind(&task.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                e
            )))
        })?;

        let task_id = TaskId(result.last_insert_rowid());

        for (index, input) in task.inputs.iter().enumerate() {
            let input_json = serde_json::to_string(input)?;
            sqlx::query(
                r#"
                INSERT INTO sub_tasks (task_id, id, status, input, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(task_id)
            .bind(pad_index(index as u32))
            .bind(SubTaskStatus::Pending.to_i32())
            .bind(input_json)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert sub-task {}: {}",
                    index, e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit task: {}",
                e
            )))
        })?;

        Ok(task_id)
    }

    /// Get a raw task row by ID
    pub async fn get_task_row(&self, id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("{} WHERE id = ?", SELECT_TASK))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get task: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskInfo>> {
        self.get_task_row(id)
            .await?
            .map(TaskInfo::try_from)
            .transpose()
    }

    /// List tasks, newest first
    pub async fn list_tasks(&self, limit: i64) -> Result<Vec<TaskInfo>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "{} ORDER BY created_at DESC, id DESC LIMIT ?",
            SELECT_TASK
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks: {}",
                e
            )))
        })?;

        rows.into_iter().map(TaskInfo::try_from).collect()
    }

    /// Record the finalize result for a task
    ///
    /// Only applies while the task is not finalized yet. `stats` replaces the
    /// stored counters. Returns `false` when an earlier call already finalized it.
    pub async fn finalize_task(
        &self,
        id: TaskId,
        status: TaskStatus,
        stats: &TaskStats,
        manifest: &FinalizeManifest,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let output = serde_json::to_string(manifest)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, output = ?, finished_at = ?, updated_at = ?,
                stats_pending = ?, stats_processing = ?, stats_completed = ?, stats_failed = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(status.to_i32())
        .bind(output)
        .bind(now)
        .bind(now)
        .bind(stats.pending)
        .bind(stats.processing)
        .bind(stats.completed)
        .bind(stats.failed)
        .bind(id)
        .bind(TaskStatus::Pending.to_i32())
        .bind(TaskStatus::Processing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to finalize task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }
}
