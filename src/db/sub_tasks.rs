//! Sub-task reads and status writes.

use crate::error::DatabaseError;
use crate::types::{SubTask, SubTaskStatus, SubTaskUpdate, TaskId};
use crate::{Error, Result};

use super::{Database, SubTaskRow};

const SELECT_SUB_TASK: &str = r#"
    SELECT
        task_id, id, status, input, output, error,
        created_at, started_at, finished_at
    FROM sub_tasks
"#;

impl Database {
    /// Get a sub-task by its zero-padded id
    pub async fn get_sub_task(&self, task_id: TaskId, sub_task_id: &str) -> Result<Option<SubTask>> {
        let row = sqlx::query_as::<_, SubTaskRow>(&format!(
            "{} WHERE task_id = ? AND id = ?",
            SELECT_SUB_TASK
        ))
        .bind(task_id)
        .bind(sub_task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get sub-task: {}",
                e
            )))
        })?;

        row.map(SubTask::try_from).transpose()
    }

    /// List all sub-tasks of a task in index order
    pub async fn list_sub_tasks(&self, task_id: TaskId) -> Result<Vec<SubTask>> {
        let rows = sqlx::query_as::<_, SubTaskRow>(&format!(
            "{} WHERE task_id = ? ORDER BY id ASC",
            SELECT_SUB_TASK
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list sub-tasks: {}",
                e
            )))
        })?;

        rows.into_iter().map(SubTask::try_from).collect()
    }

    /// Apply a partial update to a sub-task and return the stored record
    ///
    /// Moving to PROCESSING stamps `started_at`; moving to a terminal status
    /// stamps `finished_at`.
    pub async fn update_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        update: &SubTaskUpdate,
    ) -> Result<SubTask> {
        let affected = self
            .write_sub_task(task_id, sub_task_id, None, update)
            .await?;
        if affected == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "sub-task {} of task {}",
                sub_task_id, task_id
            ))));
        }

        self.get_sub_task(task_id, sub_task_id).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!(
                "sub-task {} of task {}",
                sub_task_id, task_id
            )))
        })
    }

    /// Apply a partial update only if the sub-task is currently in `from`
    ///
    /// This is the compare-and-swap used to claim a sub-task: of several turns
    /// racing on the same sub-task, exactly one gets `Some`.
    pub async fn transition_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        from: SubTaskStatus,
        update: &SubTaskUpdate,
    ) -> Result<Option<SubTask>> {
        let affected = self
            .write_sub_task(task_id, sub_task_id, Some(from), update)
            .await?;
        if affected == 0 {
            return Ok(None);
        }

        self.get_sub_task(task_id, sub_task_id).await
    }

    async fn write_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        expected: Option<SubTaskStatus>,
        update: &SubTaskUpdate,
    ) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let status = update.status.map(|s| s.to_i32());
        let output = update
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error = update.error.as_ref().map(serde_json::to_string).transpose()?;
        let starts = update.status == Some(SubTaskStatus::Processing);
        let finishes = update.status.is_some_and(|s| s.is_terminal());

        let mut sql = String::from(
            r#"
            UPDATE sub_tasks SET
                status = COALESCE(?, status),
                output = COALESCE(?, output),
                error = COALESCE(?, error),
                started_at = CASE WHEN ? THEN ? ELSE started_at END,
                finished_at = CASE WHEN ? THEN ? ELSE finished_at END
            WHERE task_id = ? AND id = ?
            "#,
        );
        if expected.is_some() {
            sql.push_str(" AND status = ?");
        }

        let mut query = sqlx::query(&sql)
            .bind(status)
            .bind(output)
            .bind(error)
            .bind(starts)
            .bind(now)
            .bind(finishes)
            .bind(now)
            .bind(task_id)
            .bind(sub_task_id);
        if let Some(from) = expected {
            query = query.bind(from.to_i32());
        }

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update sub-task {}: {}",
                sub_task_id, e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Lowest index still PENDING, if any
    pub async fn first_pending_index(&self, task_id: TaskId) -> Result<Option<u32>> {
        let id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM sub_tasks
            WHERE task_id = ? AND status = ?
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .bind(SubTaskStatus::Pending.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find first pending sub-task: {}",
                e
            )))
        })?;

        id.map(|id| {
            id.parse::<u32>().map_err(|e| {
                Error::Other(format!("malformed sub-task id '{}': {}", id, e))
            })
        })
        .transpose()
    }

    /// Sub-tasks stuck in PROCESSING since before `started_before` (unix seconds)
    pub async fn list_stalled_sub_tasks(
        &self,
        task_id: TaskId,
        started_before: i64,
    ) -> Result<Vec<SubTask>> {
        let rows = sqlx::query_as::<_, SubTaskRow>(&format!(
            "{} WHERE task_id = ? AND status = ? AND started_at < ? ORDER BY id ASC",
            SELECT_SUB_TASK
        ))
        .bind(task_id)
        .bind(SubTaskStatus::Processing.to_i32())
        .bind(started_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list stalled sub-tasks: {}",
                e
            )))
        })?;

        rows.into_iter().map(SubTask::try_from).collect()
    }
}
