//! Resuming chains that stopped before finalize.
//!
//! A chain stalls when a continuation could not be dispatched or a turn timed
//! out. Nothing restarts it automatically; an operator calls `resume_task`.

use crate::error::{Error, Result, TurnError};
use crate::types::{
    Event, FinalizeInvocation, Identity, Invocation, ProcessInvocation, SubTaskStatus,
    SubTaskUpdate, TaskId,
};
use serde::{Deserialize, Serialize};

use super::ChainProcessor;

/// What a resume did
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeReport {
    /// Task resumed
    pub task_id: TaskId,
    /// Sub-tasks marked FAILED with `TIMED_OUT`
    pub timed_out: Vec<String>,
    /// Target dispatched (`process` or `finalize`); `None` if already finalized
    pub dispatched: Option<String>,
    /// Index dispatched when the target is `process`
    pub sub_task_index: Option<u32>,
}

impl ChainProcessor {
    /// Restart a stalled chain
    ///
    /// PROCESSING sub-tasks claimed longer ago than `runner.stall_timeout` are
    /// failed with `TIMED_OUT`. Then `advance` is dispatched at the lowest
    /// PENDING index, or finalize when none remains. A finalized task is left
    /// untouched.
    pub async fn resume_task(&self, task_id: TaskId, identity: Identity) -> Result<ResumeReport> {
        self.ensure_accepting()?;

        let task = self
            .db
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

        if task.status.is_finalized() {
            tracing::info!(task_id = task_id.0, status = ?task.status, "task already finalized, nothing to resume");
            return Ok(ResumeReport {
                task_id,
                timed_out: Vec::new(),
                dispatched: None,
                sub_task_index: None,
            });
        }

        let timed_out = self.fail_stalled(task_id).await?;

        let identity = Identity::system_for(&identity);
        let next_index = self.db.first_pending_index(task_id).await?;
        let next = match next_index {
            Some(sub_task_index) => Invocation::Process(ProcessInvocation {
                task_id,
                sub_task_index,
                job_type: task.job_type,
                identity,
            }),
            None => Invocation::Finalize(FinalizeInvocation {
                task_id,
                job_type: task.job_type,
                identity,
            }),
        };

        let target = self
            .dispatch_continuation(next)
            .await
            .map_err(|e| Error::Dispatch(e.to_string()))?;

        tracing::info!(
            task_id = task_id.0,
            target,
            ?next_index,
            timed_out = timed_out.len(),
            "task resumed"
        );

        Ok(ResumeReport {
            task_id,
            timed_out,
            dispatched: Some(target.to_string()),
            sub_task_index: next_index,
        })
    }

    async fn fail_stalled(&self, task_id: TaskId) -> Result<Vec<String>> {
        let stall_timeout = chrono::Duration::from_std(self.config.runner.stall_timeout)
            .map_err(|e| Error::Other(format!("invalid stall timeout: {}", e)))?;
        let cutoff = (chrono::Utc::now() - stall_timeout).timestamp();

        let mut timed_out = Vec::new();
        for sub_task in self.db.list_stalled_sub_tasks(task_id, cutoff).await? {
            let error = TurnError::TimedOut {
                sub_task_id: sub_task.id.clone(),
            };
            let update = SubTaskUpdate {
                status: Some(SubTaskStatus::Failed),
                output: None,
                error: Some(error.to_detail()),
            };

            let failed = self
                .sub_tasks
                .claim_sub_task(task_id, &sub_task.id, SubTaskStatus::Processing, update)
                .await?;
            if failed.is_none() {
                // Finished while we were looking
                continue;
            }

            tracing::warn!(task_id = task_id.0, sub_task_id = %sub_task.id, "stalled sub-task failed with TIMED_OUT");
            self.apply_delta(task_id, SubTaskStatus::Processing, SubTaskStatus::Failed)
                .await;
            self.emit_event(Event::SubTaskFailed {
                task_id,
                sub_task_id: sub_task.id.clone(),
                code: error.code().to_string(),
                error: error.to_string(),
            });
            timed_out.push(sub_task.id);
        }

        Ok(timed_out)
    }
}
