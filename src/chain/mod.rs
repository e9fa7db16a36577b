//! Task chain processing split into focused submodules.
//!
//! The `ChainProcessor` struct and its methods are organized by concern:
//! - [`orchestrator`] - One `advance` turn: claim, process, record, continue
//! - [`finalize`] - Idempotent finalize (combine) step
//! - [`initiate`] - Task creation and first dispatch
//! - [`recovery`] - Operator-triggered resume of stalled chains
//! - [`dispatch`] - Continuation dispatchers (in-process queue and HTTP)
//! - [`runner`] - Invocation queue consumer with bounded concurrency

mod dispatch;
mod finalize;
mod initiate;
mod orchestrator;
mod recovery;
mod runner;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use dispatch::{ChannelDispatcher, ContinuationDispatcher, HttpDispatcher};
pub use recovery::ResumeReport;
pub use runner::ChainRunner;

use crate::config::{Config, DispatchMode};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::export::{ItemProcessor, ItemResolver, JsonDirResolver, ZipExporter};
use crate::store::{StatsStore, SubTaskStore};
use crate::telemetry::{TelemetryBuffer, TelemetryRecord};
use crate::types::{Event, FinalizeOutcome, Invocation, TurnOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};

/// Pluggable collaborators of a [`ChainProcessor`]
///
/// `None` fields fall back to the implementation described by the config.
#[derive(Default)]
pub struct ChainParts {
    /// Sub-task store (default: the database)
    pub sub_tasks: Option<Arc<dyn SubTaskStore>>,
    /// Stats store (default: the database)
    pub stats: Option<Arc<dyn StatsStore>>,
    /// Item resolver (default: [`JsonDirResolver`] over `export.items_dir`)
    pub resolver: Option<Arc<dyn ItemResolver>>,
    /// Item processor (default: [`ZipExporter`] into `export.export_dir`)
    pub processor: Option<Arc<dyn ItemProcessor>>,
    /// Continuation dispatcher (default: per `dispatch.mode`)
    pub dispatcher: Option<Arc<dyn ContinuationDispatcher>>,
    /// Telemetry buffer (default: built from `telemetry`)
    pub telemetry: Option<Arc<TelemetryBuffer>>,
}

/// Result of executing one queued invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum InvocationResult {
    /// Outcome of an `advance` turn
    Process(TurnOutcome),
    /// Outcome of a finalize turn
    Finalize(FinalizeOutcome),
}

/// Task chain processor (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ChainProcessor {
    /// Database instance for persistence
    /// Public for integration tests to inspect task and sub-task state
    pub db: Arc<Database>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) sub_tasks: Arc<dyn SubTaskStore>,
    pub(crate) stats: Arc<dyn StatsStore>,
    pub(crate) resolver: Arc<dyn ItemResolver>,
    pub(crate) processor: Arc<dyn ItemProcessor>,
    pub(crate) dispatcher: Arc<dyn ContinuationDispatcher>,
    pub(crate) telemetry: Arc<TelemetryBuffer>,
    /// Sending side of the local invocation queue
    pub(crate) queue_tx: mpsc::Sender<Invocation>,
    /// Receiving side, taken once by [`ChainProcessor::start_runner`]
    pub(crate) queue_rx: Arc<Mutex<Option<mpsc::Receiver<Invocation>>>>,
    /// Cleared on shutdown; new tasks and invocations are refused afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl ChainProcessor {
    /// Create a processor with the default collaborators for `config`
    ///
    /// Opens (and migrates) the database at `persistence.database_path`.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        Self::with_parts(config, db, ChainParts::default())
    }

    /// Create a processor over an open database with custom collaborators
    pub fn with_parts(config: Config, db: Arc<Database>, parts: ChainParts) -> Result<Self> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::channel(config.runner.queue_capacity.max(1));

        let dispatcher: Arc<dyn ContinuationDispatcher> = match parts.dispatcher {
            Some(dispatcher) => dispatcher,
            None => match config.dispatch.mode {
                DispatchMode::Channel => Arc::new(ChannelDispatcher::new(queue_tx.clone())),
                DispatchMode::Http => Arc::new(HttpDispatcher::from_config(&config.dispatch)?),
            },
        };

        let sub_tasks = parts
            .sub_tasks
            .unwrap_or_else(|| db.clone() as Arc<dyn SubTaskStore>);
        let stats = parts
            .stats
            .unwrap_or_else(|| db.clone() as Arc<dyn StatsStore>);
        let resolver = parts.resolver.unwrap_or_else(|| {
            Arc::new(JsonDirResolver::new(&config.export.items_dir)) as Arc<dyn ItemResolver>
        });
        let processor = parts.processor.unwrap_or_else(|| {
            Arc::new(ZipExporter::new(&config.export.export_dir)) as Arc<dyn ItemProcessor>
        });
        let telemetry = parts
            .telemetry
            .unwrap_or_else(|| Arc::new(TelemetryBuffer::from_config(&config.telemetry)));

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            db,
            config: Arc::new(config),
            event_tx,
            sub_tasks,
            stats,
            resolver,
            processor,
            dispatcher,
            telemetry,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(Some(queue_rx))),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to chain events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Emit an event; having no subscribers is not an error
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Whether new tasks and invocations are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Put an invocation on the local queue without waiting for it to run
    ///
    /// Used by the HTTP invocation endpoints. Fails with [`Error::Dispatch`] when
    /// the queue is full or no runner is consuming it.
    pub fn enqueue(&self, invocation: Invocation) -> Result<()> {
        self.ensure_accepting()?;
        dispatch::try_enqueue(&self.queue_tx, invocation)
    }

    /// Run one invocation to completion under the turn timeout
    ///
    /// Records one telemetry entry per call. A timed-out `advance` leaves its
    /// sub-task PROCESSING and dispatches nothing; [`ChainProcessor::resume_task`]
    /// picks the chain up again.
    pub async fn execute(&self, invocation: Invocation) -> Result<InvocationResult> {
        let task_id = invocation.task_id();
        let target = invocation.target();
        let turn_timeout = self.config.runner.turn_timeout;
        let started = std::time::Instant::now();

        let run = async {
            match invocation {
                Invocation::Process(process) => {
                    Ok(InvocationResult::Process(self.advance(process).await))
                }
                Invocation::Finalize(finalize) => {
                    self.finalize(finalize).await.map(InvocationResult::Finalize)
                }
            }
        };

        let result = match tokio::time::timeout(turn_timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    task_id = task_id.0,
                    target,
                    timeout_secs = turn_timeout.as_secs(),
                    "turn timed out; chain stalled until resumed"
                );
                self.emit_event(Event::TurnTimedOut {
                    task_id,
                    target: target.to_string(),
                });
                Err(Error::Other(format!(
                    "{} turn for task {} timed out after {:?}",
                    target, task_id, turn_timeout
                )))
            }
        };

        let failed = match &result {
            Ok(InvocationResult::Process(outcome)) => outcome
                .error
                .as_ref()
                .is_some_and(|e| e.code != "SUBTASK_NOT_PENDING"),
            Ok(InvocationResult::Finalize(_)) => false,
            Err(_) => true,
        };
        self.telemetry
            .record(TelemetryRecord::new(target, started.elapsed(), failed))
            .await;

        result
    }

    /// Stop accepting work, flush telemetry and announce shutdown
    ///
    /// Use [`ChainRunner::shutdown`] when a runner is active; it drains in-flight
    /// turns first and then calls this.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating chain processor shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);
        self.telemetry.stop().await;
        self.emit_event(Event::Shutdown);
        tracing::info!("Chain processor shutdown complete");
    }
}
