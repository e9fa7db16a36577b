//! Task handlers: start, inspect, resume.

use super::{ListTasksQuery, ResumeRequest, StartTaskResponse};
use crate::api::AppState;
use crate::chain::ResumeReport;
use crate::error::{Error, Result};
use crate::types::{Identity, IdentityKind, NewTaskRequest, SubTask, TaskId, TaskInfo};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

/// POST /tasks - Create a task and start its chain
pub async fn start_task(
    State(state): State<AppState>,
    Json(request): Json<NewTaskRequest>,
) -> Result<(StatusCode, Json<StartTaskResponse>)> {
    let task_id = state.processor.start_task(request).await?;
    Ok((StatusCode::CREATED, Json(StartTaskResponse { task_id })))
}

/// GET /tasks - Most recent tasks first
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskInfo>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    Ok(Json(state.processor.db.list_tasks(limit).await?))
}

/// GET /tasks/:id - Task with its counters and manifest
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskInfo>> {
    let task_id = TaskId(id);
    state
        .processor
        .db
        .get_task(task_id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))
}

/// GET /tasks/:id/sub-tasks - Sub-tasks in index order
pub async fn list_sub_tasks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<SubTask>>> {
    let task_id = TaskId(id);
    if state.processor.db.get_task_row(task_id).await?.is_none() {
        return Err(Error::NotFound(format!("task {}", task_id)));
    }
    Ok(Json(state.processor.db.list_sub_tasks(task_id).await?))
}

/// POST /tasks/:id/resume - Restart a stalled chain
pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ResumeRequest>>,
) -> Result<(StatusCode, Json<ResumeReport>)> {
    let identity = body
        .and_then(|Json(request)| request.identity)
        .unwrap_or_else(operator_identity);
    let report = state.processor.resume_task(TaskId(id), identity).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

fn operator_identity() -> Identity {
    Identity {
        id: "api".to_string(),
        display_name: "API operator".to_string(),
        kind: IdentityKind::System,
    }
}
