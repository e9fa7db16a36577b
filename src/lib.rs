//! # taskchain
//!
//! Self-continuing task chain processor for long-running multi-item jobs.
//!
//! A task is split into indexed sub-tasks. Each turn handles at most one
//! sub-task and then dispatches exactly one continuation: the next index, or
//! finalize once no pending work is left. All state lives in SQLite, so any
//! turn can run on any worker and a lost chain can be resumed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use taskchain::{ChainProcessor, Config, Event, Identity, JobType, NewTaskRequest, SubTaskInput};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = ChainProcessor::new(Config::default()).await?;
//!     let runner = processor.start_runner().await?;
//!
//!     let mut events = processor.subscribe();
//!     let task_id = processor
//!         .start_task(NewTaskRequest {
//!             job_type: JobType::ExportBlocks,
//!             items: vec![SubTaskInput {
//!                 item_id: "hero-banner".to_string(),
//!                 data_key: "exports/hero-banner".to_string(),
//!             }],
//!             identity: Identity::user("user-1", "Ada"),
//!         })
//!         .await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let Event::TaskFinalized { task_id: id, status } = event
//!             && id == task_id
//!         {
//!             println!("task {} finished: {:?}", id, status);
//!             break;
//!         }
//!     }
//!
//!     runner.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Invocation API (axum)
pub mod api;
/// Task chain processing (decomposed into focused submodules)
pub mod chain;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Item resolution and processing
pub mod export;
/// Retry logic with exponential backoff
pub mod retry;
/// Store traits used by turns
pub mod store;
/// Buffered per-invocation telemetry
pub mod telemetry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use chain::{
    ChainParts, ChainProcessor, ChainRunner, ChannelDispatcher, ContinuationDispatcher,
    HttpDispatcher, InvocationResult, ResumeReport,
};
pub use config::{Config, DispatchMode};
pub use db::Database;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus, TurnError};
pub use export::{Item, ItemProcessor, ItemResolver, JsonDirResolver, ZipExporter};
pub use store::{StatsStore, SubTaskStore};
pub use telemetry::{FlushPolicy, TelemetryBuffer, TelemetrySink};
pub use types::{
    Event, FinalizeInvocation, FinalizeManifest, FinalizeOutcome, Identity, IdentityKind,
    Invocation, JobType, NewTaskRequest, ProcessInvocation, StatsDelta, SubTask, SubTaskInput,
    SubTaskOutput, SubTaskStatus, TaskId, TaskInfo, TaskStats, TaskStatus, TurnOutcome,
};

/// Run the chain runner and the API server until a termination signal.
///
/// On the signal the server stops accepting connections, the runner drains
/// in-flight turns and the processor shuts down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use taskchain::{ChainProcessor, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let processor = ChainProcessor::new(Config::default()).await?;
///     run_with_shutdown(processor).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(processor: ChainProcessor) -> Result<()> {
    let runner = processor.start_runner().await?;
    let config = processor.config.clone();

    let served = api::start_api_server_with_shutdown(processor, config, wait_for_signal()).await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "API server failed");
    }

    runner.shutdown().await?;
    served
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
