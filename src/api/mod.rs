//! Invocation API server
//!
//! Exposes the continuation targets used by [`crate::chain::HttpDispatcher`]
//! plus read-only task inspection and an operator resume endpoint.

use crate::{ChainProcessor, Config, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router
///
/// # Routes
///
/// ## Invocation targets
/// - `POST /invoke/process` - Queue an `advance` turn
/// - `POST /invoke/finalize` - Queue a finalize turn
///
/// ## Tasks
/// - `POST /tasks` - Create a task and start its chain
/// - `GET /tasks` - List recent tasks
/// - `GET /tasks/:id` - Task status, counters and manifest
/// - `GET /tasks/:id/sub-tasks` - Sub-tasks in index order
/// - `POST /tasks/:id/resume` - Restart a stalled chain
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /events` - Server-sent events stream
pub fn create_router(processor: ChainProcessor, config: Arc<Config>) -> Router {
    let api_key = config.server.api_key.clone();
    let state = AppState::new(processor, config);

    let router = Router::new()
        .route("/invoke/process", post(routes::invoke_process))
        .route("/invoke/finalize", post(routes::invoke_finalize))
        .route("/tasks", post(routes::start_task).get(routes::list_tasks))
        .route("/tasks/:id", get(routes::get_task))
        .route("/tasks/:id/sub-tasks", get(routes::list_sub_tasks))
        .route("/tasks/:id/resume", post(routes::resume_task))
        .route("/health", get(routes::health_check))
        .route("/events", get(routes::event_stream))
        .with_state(state);

    // Auth is innermost so rejected requests are still traced
    let router = if api_key.is_some() {
        router.layer(middleware::from_fn_with_state(api_key, auth::require_api_key))
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http())
}

/// Serve the API on `server.bind_address` until the process stops
///
/// # Example
///
/// ```no_run
/// use taskchain::{ChainProcessor, Config};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let processor = ChainProcessor::new(config.clone()).await?;
/// let _runner = processor.start_runner().await?;
///
/// taskchain::api::start_api_server(processor, Arc::new(config)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(processor: ChainProcessor, config: Arc<Config>) -> Result<()> {
    start_api_server_with_shutdown(processor, config, std::future::pending()).await
}

/// Serve the API until `shutdown` resolves, then finish open requests
pub async fn start_api_server_with_shutdown<F>(
    processor: ChainProcessor,
    config: Arc<Config>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_address = config.server.bind_address;
    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(processor, config);
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().map_err(crate::error::Error::Io)?,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
