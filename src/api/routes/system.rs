//! System handlers: health and the event stream.

use crate::api::AppState;
use crate::types::Event;
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "accepting": state.processor.is_accepting(),
    }))
}

/// GET /events - Chain events as server-sent events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.processor.subscribe());

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(SseEvent::default().event(event_name(&event)).data(data))),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE client lagged");
            Some(Ok(SseEvent::default()
                .event("error")
                .data(json!({ "error": "lagged", "skipped": skipped }).to_string())))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// SSE event name for `event`
pub fn event_name(event: &Event) -> &'static str {
    match event {
        Event::TaskStarted { .. } => "task_started",
        Event::SubTaskStarted { .. } => "sub_task_started",
        Event::SubTaskCompleted { .. } => "sub_task_completed",
        Event::SubTaskFailed { .. } => "sub_task_failed",
        Event::SubTaskSkipped { .. } => "sub_task_skipped",
        Event::ContinuationDispatched { .. } => "continuation_dispatched",
        Event::DispatchFailed { .. } => "dispatch_failed",
        Event::TaskFinalized { .. } => "task_finalized",
        Event::TurnTimedOut { .. } => "turn_timed_out",
        Event::Shutdown => "shutdown",
    }
}
