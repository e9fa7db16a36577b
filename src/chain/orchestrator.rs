//! One `advance` turn of a task chain.
//!
//! A turn re-reads its sub-task from the store, claims it with a conditional
//! PENDING -> PROCESSING write, runs the item processor, records the result and
//! then dispatches exactly one continuation: the next index when this turn
//! found work, finalize when it did not. Nothing is carried between turns.

use crate::error::TurnError;
use crate::export::Item;
use crate::types::{
    Event, FinalizeInvocation, Identity, Invocation, ProcessInvocation, StatsDelta, SubTask,
    SubTaskOutput, SubTaskStatus, SubTaskUpdate, TaskId, TurnOutcome, pad_index,
};

use super::ChainProcessor;

/// What a turn did with its sub-task
struct TurnResult {
    /// The sub-task was absent or not PENDING (chain end reached)
    no_pending_work: bool,
    data: Option<SubTaskOutput>,
    error: Option<TurnError>,
}

impl TurnResult {
    fn nothing_to_do(error: TurnError) -> Self {
        Self {
            no_pending_work: true,
            data: None,
            error: Some(error),
        }
    }

    fn worked(data: Option<SubTaskOutput>, error: Option<TurnError>) -> Self {
        Self {
            no_pending_work: false,
            data,
            error,
        }
    }
}

impl ChainProcessor {
    /// Advance a task chain by at most one sub-task
    ///
    /// Never fails: every error is recorded on the sub-task and summarized in the
    /// returned [`TurnOutcome`]. Exactly one continuation is dispatched per call.
    pub async fn advance(&self, invocation: ProcessInvocation) -> TurnOutcome {
        let ProcessInvocation {
            task_id,
            sub_task_index,
            job_type,
            identity,
        } = invocation;
        let sub_task_id = pad_index(sub_task_index);

        tracing::debug!(
            task_id = task_id.0,
            sub_task_id = %sub_task_id,
            job_type = %job_type,
            "running process turn"
        );

        let turn = self.run_turn(task_id, sub_task_index, &sub_task_id).await;

        // Continuations act as the system on behalf of the initiator
        let identity = Identity::system_for(&identity);
        let next = if turn.no_pending_work {
            tracing::info!(task_id = task_id.0, "no pending sub-task, dispatching finalize");
            Invocation::Finalize(FinalizeInvocation {
                task_id,
                job_type,
                identity,
            })
        } else {
            Invocation::Process(ProcessInvocation {
                task_id,
                sub_task_index: sub_task_index + 1,
                job_type,
                identity,
            })
        };

        let (dispatched, error) = match self.dispatch_continuation(next).await {
            Ok(target) => (Some(target.to_string()), turn.error),
            // A stalled chain outranks the sub-task's own failure, which is
            // already recorded on the sub-task
            Err(dispatch_error) => (None, Some(dispatch_error)),
        };

        TurnOutcome {
            task_id,
            sub_task_index,
            data: turn.data,
            error: error.map(|e| e.to_summary()),
            dispatched,
        }
    }

    async fn run_turn(&self, task_id: TaskId, index: u32, sub_task_id: &str) -> TurnResult {
        // 1. Fresh read; nothing is trusted from earlier turns
        let sub_task = match self.sub_tasks.get_sub_task(task_id, sub_task_id).await {
            Ok(Some(sub_task)) if sub_task.status == SubTaskStatus::Pending => sub_task,
            Ok(_) => {
                tracing::debug!(task_id = task_id.0, sub_task_id, "sub-task absent or not pending");
                self.emit_event(Event::SubTaskSkipped {
                    task_id,
                    sub_task_index: index,
                });
                return TurnResult::nothing_to_do(TurnError::NotPending {
                    sub_task_id: sub_task_id.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(task_id = task_id.0, sub_task_id, error = %e, "failed to read sub-task");
                return TurnResult::nothing_to_do(TurnError::StoreReadFailure(e.to_string()));
            }
        };

        // 2. Resolve the item before claiming so a missing item never leaves a
        //    PROCESSING sub-task behind
        let item = match self.resolver.resolve(&sub_task.input.item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                tracing::warn!(
                    task_id = task_id.0,
                    sub_task_id,
                    item_id = %sub_task.input.item_id,
                    "unable to load item"
                );
                let error = TurnError::ItemNotFound {
                    item_id: sub_task.input.item_id.clone(),
                };
                return self.fail_unclaimed(&sub_task, error).await;
            }
            Err(e) => {
                tracing::warn!(task_id = task_id.0, sub_task_id, error = %e, "item resolution failed");
                return self.fail_unclaimed(&sub_task, TurnError::from(e)).await;
            }
        };

        // 3. Claim, process, complete
        let claim = SubTaskUpdate {
            status: Some(SubTaskStatus::Processing),
            ..Default::default()
        };
        let claimed = self
            .sub_tasks
            .claim_sub_task(task_id, sub_task_id, SubTaskStatus::Pending, claim)
            .await;
        match claimed {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::info!(task_id = task_id.0, sub_task_id, "sub-task claimed by another turn");
                return TurnResult::nothing_to_do(TurnError::NotPending {
                    sub_task_id: sub_task_id.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(task_id = task_id.0, sub_task_id, error = %e, "failed to claim sub-task");
                return TurnResult::worked(None, Some(TurnError::StoreWriteFailure(e.to_string())));
            }
        }

        self.apply_delta(task_id, SubTaskStatus::Pending, SubTaskStatus::Processing)
            .await;
        self.emit_event(Event::SubTaskStarted {
            task_id,
            sub_task_id: sub_task_id.to_string(),
        });

        self.process_claimed(&sub_task, &item).await
    }

    async fn process_claimed(&self, sub_task: &SubTask, item: &Item) -> TurnResult {
        let task_id = sub_task.task_id;
        let sub_task_id = sub_task.id.as_str();

        tracing::info!(task_id = task_id.0, sub_task_id, item_id = %item.id, "processing item");

        let output = match self.processor.process(item, &sub_task.input).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(task_id = task_id.0, sub_task_id, error = %e, "item processor failed");
                let error = TurnError::from(e);
                return self
                    .fail_claimed(sub_task, SubTaskStatus::Processing, error)
                    .await;
            }
        };

        let update = SubTaskUpdate {
            status: Some(SubTaskStatus::Completed),
            output: Some(output.clone()),
            error: None,
        };
        if let Err(e) = self
            .sub_tasks
            .update_sub_task(task_id, sub_task_id, update)
            .await
        {
            tracing::error!(task_id = task_id.0, sub_task_id, error = %e, "failed to record completion");
            let error = TurnError::StoreWriteFailure(e.to_string());
            return self
                .fail_claimed(sub_task, SubTaskStatus::Processing, error)
                .await;
        }

        self.apply_delta(task_id, SubTaskStatus::Processing, SubTaskStatus::Completed)
            .await;
        self.emit_event(Event::SubTaskCompleted {
            task_id,
            sub_task_id: sub_task_id.to_string(),
            key: output.key.clone(),
        });

        TurnResult::worked(Some(output), None)
    }

    /// PENDING -> FAILED for a sub-task this turn never claimed
    async fn fail_unclaimed(&self, sub_task: &SubTask, error: TurnError) -> TurnResult {
        let task_id = sub_task.task_id;
        let update = SubTaskUpdate {
            status: Some(SubTaskStatus::Failed),
            output: None,
            error: Some(error.to_detail()),
        };

        match self
            .sub_tasks
            .claim_sub_task(task_id, &sub_task.id, SubTaskStatus::Pending, update)
            .await
        {
            Ok(Some(_)) => {
                self.apply_delta(task_id, SubTaskStatus::Pending, SubTaskStatus::Failed)
                    .await;
                self.emit_failed(sub_task, &error);
                TurnResult::worked(None, Some(error))
            }
            Ok(None) => {
                tracing::info!(
                    task_id = task_id.0,
                    sub_task_id = %sub_task.id,
                    "sub-task changed status before failure was recorded"
                );
                TurnResult::nothing_to_do(TurnError::NotPending {
                    sub_task_id: sub_task.id.clone(),
                })
            }
            Err(e) => {
                tracing::error!(
                    task_id = task_id.0,
                    sub_task_id = %sub_task.id,
                    code = error.code(),
                    error = %e,
                    "failed to record sub-task failure"
                );
                TurnResult::worked(
                    None,
                    Some(TurnError::StoreWriteFailure(format!(
                        "failed to record {}: {}",
                        error.code(),
                        e
                    ))),
                )
            }
        }
    }

    /// `previous` -> FAILED for a sub-task this turn owns
    async fn fail_claimed(
        &self,
        sub_task: &SubTask,
        previous: SubTaskStatus,
        error: TurnError,
    ) -> TurnResult {
        let task_id = sub_task.task_id;
        let update = SubTaskUpdate {
            status: Some(SubTaskStatus::Failed),
            output: None,
            error: Some(error.to_detail()),
        };

        match self
            .sub_tasks
            .update_sub_task(task_id, &sub_task.id, update)
            .await
        {
            Ok(_) => {
                self.apply_delta(task_id, previous, SubTaskStatus::Failed)
                    .await;
                self.emit_failed(sub_task, &error);
                TurnResult::worked(None, Some(error))
            }
            Err(e) => {
                tracing::error!(
                    task_id = task_id.0,
                    sub_task_id = %sub_task.id,
                    code = error.code(),
                    error = %e,
                    "failed to record sub-task failure; status may be stale"
                );
                TurnResult::worked(
                    None,
                    Some(TurnError::StoreWriteFailure(format!(
                        "failed to record {}: {}",
                        error.code(),
                        e
                    ))),
                )
            }
        }
    }

    fn emit_failed(&self, sub_task: &SubTask, error: &TurnError) {
        self.emit_event(Event::SubTaskFailed {
            task_id: sub_task.task_id,
            sub_task_id: sub_task.id.clone(),
            code: error.code().to_string(),
            error: error.to_string(),
        });
    }

    /// Apply a stats delta; a failure is logged and never aborts the turn
    pub(crate) async fn apply_delta(
        &self,
        task_id: TaskId,
        previous: SubTaskStatus,
        next: SubTaskStatus,
    ) {
        if let Err(e) = self
            .stats
            .apply_delta(task_id, StatsDelta::new(previous, next))
            .await
        {
            tracing::warn!(
                task_id = task_id.0,
                previous = %previous,
                next = %next,
                error = %e,
                "failed to update task stats"
            );
        }
    }

    /// Dispatch a continuation once; returns the target name on success
    pub(crate) async fn dispatch_continuation(
        &self,
        invocation: Invocation,
    ) -> Result<&'static str, TurnError> {
        let task_id = invocation.task_id();
        let target = invocation.target();
        let sub_task_index = match &invocation {
            Invocation::Process(process) => Some(process.sub_task_index),
            Invocation::Finalize(_) => None,
        };

        match self.dispatcher.dispatch(invocation).await {
            Ok(()) => {
                tracing::debug!(task_id = task_id.0, target, ?sub_task_index, "continuation dispatched");
                self.emit_event(Event::ContinuationDispatched {
                    task_id,
                    target: target.to_string(),
                    sub_task_index,
                });
                Ok(target)
            }
            Err(e) => {
                tracing::error!(
                    task_id = task_id.0,
                    target,
                    error = %e,
                    "failed to dispatch continuation; chain stalled until resumed"
                );
                self.emit_event(Event::DispatchFailed {
                    task_id,
                    target: target.to_string(),
                    error: e.to_string(),
                });
                Err(TurnError::DispatchFailure(e.to_string()))
            }
        }
    }
}
