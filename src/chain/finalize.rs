//! Finalize (combine) step of a task chain.

use crate::error::{Error, Result};
use crate::types::{
    Event, FinalizeInvocation, FinalizeManifest, FinalizeOutcome, SubTask, SubTaskStatus,
    TaskInfo, TaskStats,
};

use super::ChainProcessor;

impl ChainProcessor {
    /// Finalize a task once every sub-task is terminal
    ///
    /// Safe to call any number of times: only the first call that sees all
    /// sub-tasks terminal writes the overall status and manifest. Later calls
    /// return [`FinalizeOutcome::AlreadyFinalized`]; calls made while work is
    /// still pending return [`FinalizeOutcome::NotReady`] and change nothing.
    pub async fn finalize(&self, invocation: FinalizeInvocation) -> Result<FinalizeOutcome> {
        let task_id = invocation.task_id;
        let task = self
            .db
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

        if task.job_type != invocation.job_type {
            tracing::warn!(
                task_id = task_id.0,
                task_type = %task.job_type,
                invocation_type = %invocation.job_type,
                "finalize invoked with a different job type than the task"
            );
        }

        if task.status.is_finalized() {
            tracing::debug!(task_id = task_id.0, status = ?task.status, "task already finalized");
            return Ok(FinalizeOutcome::AlreadyFinalized {
                status: task.status,
            });
        }

        // Counters can lag behind a failed stats write; the sub-tasks are authoritative
        let sub_tasks = self.db.list_sub_tasks(task_id).await?;
        let stats = TaskStats::tally(sub_tasks.iter().map(|sub_task| sub_task.status));
        if stats != task.stats {
            tracing::warn!(
                task_id = task_id.0,
                recorded = ?task.stats,
                actual = ?stats,
                "task counters out of sync with sub-tasks"
            );
        }

        if !stats.all_terminal() {
            tracing::warn!(
                task_id = task_id.0,
                pending = stats.pending,
                processing = stats.processing,
                "finalize called with unfinished sub-tasks, leaving task open"
            );
            return Ok(FinalizeOutcome::NotReady { stats });
        }

        let status = stats.derive_status();
        let manifest = build_manifest(&task, sub_tasks);

        if !self.db.finalize_task(task_id, status, &stats, &manifest).await? {
            // Lost the race against a concurrent finalize
            let current = self
                .db
                .get_task(task_id)
                .await?
                .map(|t| t.status)
                .unwrap_or(status);
            return Ok(FinalizeOutcome::AlreadyFinalized { status: current });
        }

        tracing::info!(
            task_id = task_id.0,
            status = ?status,
            completed = manifest.completed.len(),
            failed = manifest.failed.len(),
            "task finalized"
        );
        self.emit_event(Event::TaskFinalized { task_id, status });

        Ok(FinalizeOutcome::Finalized { status, manifest })
    }
}

fn build_manifest(task: &TaskInfo, sub_tasks: Vec<SubTask>) -> FinalizeManifest {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    for sub_task in sub_tasks {
        match sub_task.status {
            SubTaskStatus::Completed => {
                if let Some(output) = sub_task.output {
                    completed.push(output.key);
                }
            }
            SubTaskStatus::Failed => failed.push(sub_task.id),
            SubTaskStatus::Pending | SubTaskStatus::Processing => {}
        }
    }

    FinalizeManifest {
        job_type: task.job_type,
        total: task.total,
        completed,
        failed,
    }
}
