//! Database layer for taskchain
//!
//! Handles SQLite persistence for tasks, sub-tasks and task stats.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`tasks`] — Task creation, lookup and finalization
//! - [`sub_tasks`] — Sub-task reads and (conditional) status writes
//! - [`stats`] — Atomic per-status counter updates

use crate::error::Error;
use crate::types::{
    FinalizeManifest, JobType, SubTask, SubTaskInput, SubTaskStatus, TaskId, TaskInfo, TaskStats,
    TaskStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod stats;
mod sub_tasks;
mod tasks;

/// New task to be inserted together with its sub-tasks
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Job type label
    pub job_type: JobType,
    /// Id of the identity that created the task
    pub created_by: String,
    /// One input per sub-task, in processing order
    pub inputs: Vec<SubTaskInput>,
}

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Unique database ID
    pub id: i64,
    /// Job type (see [`JobType::as_str`])
    pub job_type: String,
    /// Overall status code (see [`TaskStatus::to_i32`])
    pub status: i32,
    /// Number of sub-tasks
    pub total: i64,
    /// Sub-tasks in PENDING
    pub stats_pending: i64,
    /// Sub-tasks in PROCESSING
    pub stats_processing: i64,
    /// Sub-tasks in COMPLETED
    pub stats_completed: i64,
    /// Sub-tasks in FAILED
    pub stats_failed: i64,
    /// Creating identity id
    pub created_by: String,
    /// Finalize manifest as JSON
    pub output: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp of the last stats or status change
    pub updated_at: i64,
    /// Unix timestamp when the task was finalized
    pub finished_at: Option<i64>,
}

impl TaskRow {
    /// Per-status counters of this row
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            pending: self.stats_pending,
            processing: self.stats_processing,
            completed: self.stats_completed,
            failed: self.stats_failed,
        }
    }
}

impl TryFrom<TaskRow> for TaskInfo {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let job_type = JobType::parse(&row.job_type)
            .ok_or_else(|| Error::Other(format!("unknown job type '{}'", row.job_type)))?;
        let output = row
            .output
            .as_deref()
            .map(serde_json::from_str::<FinalizeManifest>)
            .transpose()?;

        Ok(TaskInfo {
            id: TaskId(row.id),
            job_type,
            status: TaskStatus::from_i32(row.status),
            total: row.total,
            stats: row.stats(),
            created_by: row.created_by,
            output,
            created_at: timestamp(row.created_at),
            finished_at: row.finished_at.map(timestamp),
        })
    }
}

/// Sub-task record from database
#[derive(Debug, Clone, FromRow)]
pub struct SubTaskRow {
    /// Parent task ID
    pub task_id: i64,
    /// Zero-padded index
    pub id: String,
    /// Status code (see [`SubTaskStatus::to_i32`])
    pub status: i32,
    /// Input payload as JSON
    pub input: String,
    /// Output as JSON
    pub output: Option<String>,
    /// Error detail as JSON
    pub error: Option<String>,
    /// Unix timestamp when the sub-task was created
    pub created_at: i64,
    /// Unix timestamp when the sub-task was claimed
    pub started_at: Option<i64>,
    /// Unix timestamp when the sub-task became terminal
    pub finished_at: Option<i64>,
}

impl TryFrom<SubTaskRow> for SubTask {
    type Error = Error;

    fn try_from(row: SubTaskRow) -> Result<Self, Self::Error> {
        Ok(SubTask {
            task_id: TaskId(row.task_id),
            id: row.id,
            status: SubTaskStatus::from_i32(row.status),
            input: serde_json::from_str(&row.input)?,
            output: row.output.as_deref().map(serde_json::from_str).transpose()?,
            error: row.error.as_deref().map(serde_json::from_str).transpose()?,
            started_at: row.started_at.map(timestamp),
            finished_at: row.finished_at.map(timestamp),
        })
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Database handle for taskchain
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
