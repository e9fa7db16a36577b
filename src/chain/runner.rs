//! Invocation queue consumer.

use crate::error::{Error, Result};
use crate::types::Invocation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ChainProcessor, InvocationResult};

/// How long shutdown waits for in-flight turns
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Running consumer of the local invocation queue
///
/// Each invocation runs as its own spawned turn, gated by a semaphore of
/// `runner.max_concurrent_turns` permits. Turns of one chain never overlap
/// because turn i+1 is only enqueued by turn i.
pub struct ChainRunner {
    processor: ChainProcessor,
    cancel_token: CancellationToken,
    concurrent_limit: Arc<Semaphore>,
    max_concurrent: u32,
    handle: JoinHandle<()>,
}

impl ChainProcessor {
    /// Start draining the invocation queue
    ///
    /// Also starts the telemetry flush ticker. Only one runner may exist per
    /// processor.
    pub async fn start_runner(&self) -> Result<ChainRunner> {
        let receiver = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Other("chain runner already started".to_string()))?;

        self.telemetry.start().await;

        let max_concurrent = self.config.runner.max_concurrent_turns.max(1) as u32;
        let concurrent_limit = Arc::new(Semaphore::new(max_concurrent as usize));
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(run_loop(
            self.clone(),
            receiver,
            concurrent_limit.clone(),
            cancel_token.clone(),
        ));

        tracing::info!(max_concurrent_turns = max_concurrent, "chain runner started");

        Ok(ChainRunner {
            processor: self.clone(),
            cancel_token,
            concurrent_limit,
            max_concurrent,
            handle,
        })
    }
}

async fn run_loop(
    processor: ChainProcessor,
    mut receiver: mpsc::Receiver<Invocation>,
    concurrent_limit: Arc<Semaphore>,
    cancel_token: CancellationToken,
) {
    loop {
        let invocation = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            message = receiver.recv() => match message {
                Some(invocation) => invocation,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                tracing::warn!(
                    task_id = invocation.task_id().0,
                    target = invocation.target(),
                    "dropping queued invocation at shutdown; resume the task to continue"
                );
                break;
            }
            permit = concurrent_limit.clone().acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            break;
        };

        let processor = processor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_turn(&processor, invocation).await;
        });
    }

    tracing::debug!("chain runner loop stopped");
}

async fn run_turn(processor: &ChainProcessor, invocation: Invocation) {
    let task_id = invocation.task_id();
    let target = invocation.target();

    match processor.execute(invocation).await {
        Ok(InvocationResult::Process(outcome)) => match &outcome.error {
            Some(error) => tracing::debug!(
                task_id = task_id.0,
                index = outcome.sub_task_index,
                code = %error.code,
                "process turn finished with error"
            ),
            None => tracing::debug!(
                task_id = task_id.0,
                index = outcome.sub_task_index,
                "process turn finished"
            ),
        },
        Ok(InvocationResult::Finalize(outcome)) => {
            tracing::debug!(task_id = task_id.0, ?outcome, "finalize turn finished")
        }
        Err(e) => tracing::error!(task_id = task_id.0, target, error = %e, "turn failed"),
    }
}

impl ChainRunner {
    /// Processor driven by this runner
    pub fn processor(&self) -> &ChainProcessor {
        &self.processor
    }

    /// Number of turns currently executing
    pub fn active_turns(&self) -> usize {
        self.max_concurrent as usize - self.concurrent_limit.available_permits()
    }

    /// Stop the runner and shut the processor down
    ///
    /// Stops taking invocations off the queue, waits up to 30 seconds for
    /// in-flight turns, then calls [`ChainProcessor::shutdown`]. Invocations still
    /// queued are dropped; their chains resume with
    /// [`ChainProcessor::resume_task`].
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Stopping chain runner");
        self.processor
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        self.cancel_token.cancel();

        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "chain runner loop ended abnormally");
        }

        let drain = self.concurrent_limit.acquire_many(self.max_concurrent);
        match tokio::time::timeout(SHUTDOWN_GRACE, drain).await {
            Ok(Ok(_permits)) => tracing::info!("All in-flight turns completed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "turn limiter closed during shutdown"),
            Err(_) => tracing::warn!(
                "Timeout waiting for in-flight turns to complete, proceeding with shutdown"
            ),
        }

        self.processor.shutdown().await;
        Ok(())
    }
}
