//! Invocation endpoints: the targets an HTTP continuation dispatcher posts to.
//!
//! Both only enqueue. The turn runs on the chain runner, so a chain of N
//! sub-tasks never nests N requests inside each other.

use super::QueuedResponse;
use crate::api::AppState;
use crate::error::Result;
use crate::types::{FinalizeInvocation, Invocation, ProcessInvocation};
use axum::{Json, extract::State, http::StatusCode};

/// POST /invoke/process - Queue an `advance` turn
pub async fn invoke_process(
    State(state): State<AppState>,
    Json(invocation): Json<ProcessInvocation>,
) -> Result<(StatusCode, Json<QueuedResponse>)> {
    tracing::debug!(
        task_id = invocation.task_id.0,
        index = invocation.sub_task_index,
        "process invocation received"
    );
    accept(&state, Invocation::Process(invocation))
}

/// POST /invoke/finalize - Queue a finalize turn
pub async fn invoke_finalize(
    State(state): State<AppState>,
    Json(invocation): Json<FinalizeInvocation>,
) -> Result<(StatusCode, Json<QueuedResponse>)> {
    tracing::debug!(task_id = invocation.task_id.0, "finalize invocation received");
    accept(&state, Invocation::Finalize(invocation))
}

fn accept(state: &AppState, invocation: Invocation) -> Result<(StatusCode, Json<QueuedResponse>)> {
    let response = QueuedResponse {
        task_id: invocation.task_id(),
        target: invocation.target().to_string(),
        queued: true,
    };
    state.processor.enqueue(invocation)?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
