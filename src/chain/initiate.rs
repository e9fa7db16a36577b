//! Task creation and the first dispatch of a chain.

use crate::db::NewTask;
use crate::error::{Error, Result};
use crate::types::{
    Event, FinalizeInvocation, Identity, Invocation, MAX_SUB_TASKS, NewTaskRequest,
    ProcessInvocation, TaskId,
};

use super::ChainProcessor;

impl ChainProcessor {
    /// Create a task with one PENDING sub-task per item and start its chain
    ///
    /// The task and all sub-tasks are written in one transaction before the
    /// first turn is dispatched. An empty item list dispatches finalize directly.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for more than [`MAX_SUB_TASKS`] items or items
    ///   with an empty id or data key
    /// - [`Error::Dispatch`] when the task was stored but its first turn could
    ///   not be dispatched (resume it with [`ChainProcessor::resume_task`])
    pub async fn start_task(&self, request: NewTaskRequest) -> Result<TaskId> {
        self.ensure_accepting()?;

        let NewTaskRequest {
            job_type,
            items,
            identity,
        } = request;

        if items.len() > MAX_SUB_TASKS {
            return Err(Error::Validation(format!(
                "a task holds at most {} items, got {}",
                MAX_SUB_TASKS,
                items.len()
            )));
        }
        if let Some(position) = items
            .iter()
            .position(|item| item.item_id.trim().is_empty() || item.data_key.trim().is_empty())
        {
            return Err(Error::Validation(format!(
                "item {} needs a non-empty item_id and data_key",
                position
            )));
        }

        let total = items.len();
        let task_id = self
            .db
            .insert_task(&NewTask {
                job_type,
                created_by: identity.id.clone(),
                inputs: items,
            })
            .await?;

        tracing::info!(
            task_id = task_id.0,
            job_type = %job_type,
            total,
            created_by = %identity.id,
            "task created"
        );
        self.emit_event(Event::TaskStarted {
            task_id,
            job_type,
            total,
        });

        let identity = Identity::system_for(&identity);
        let first = if total == 0 {
            Invocation::Finalize(FinalizeInvocation {
                task_id,
                job_type,
                identity,
            })
        } else {
            Invocation::Process(ProcessInvocation {
                task_id,
                sub_task_index: 0,
                job_type,
                identity,
            })
        };

        self.dispatch_continuation(first).await.map_err(|e| {
            Error::Dispatch(format!(
                "task {} created but its first turn was not dispatched: {}",
                task_id, e
            ))
        })?;

        Ok(task_id)
    }
}
