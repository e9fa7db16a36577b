//! Buffered per-invocation telemetry
//!
//! Each turn appends a [`TelemetryRecord`] to a [`TelemetryBuffer`]. The buffer
//! is flushed to a [`TelemetrySink`] when it reaches `max_records`, on every
//! `flush_interval` tick while started, and once more on [`TelemetryBuffer::stop`].
//! Size-triggered flushes run in the background so recording never waits on
//! the sink. A failed flush is logged and the batch is dropped.

use crate::config::{RetryConfig, TelemetryConfig};
use crate::retry::with_retry;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// One invocation's telemetry entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Whether the invocation ended in an error
    pub error: bool,
    /// Wall time of the invocation
    #[serde(rename = "executionDuration")]
    pub execution_duration_ms: u64,
    /// Invoked function (`process` or `finalize`)
    pub function_name: String,
    /// Unix timestamp in milliseconds
    pub created_on: i64,
}

impl TelemetryRecord {
    /// Record for an invocation that just finished
    pub fn new(function_name: impl Into<String>, duration: Duration, error: bool) -> Self {
        Self {
            error,
            execution_duration_ms: duration.as_millis() as u64,
            function_name: function_name.into(),
            created_on: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Payload sent to a sink on flush
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatch {
    /// Reporting key
    pub api_key: Option<String>,
    /// Reporter version
    pub version: String,
    /// Buffered records, oldest first
    pub logs: Vec<TelemetryRecord>,
}

/// When the buffer is flushed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush as soon as this many records are buffered
    pub max_records: usize,
    /// Flush a non-empty buffer this often while started
    pub flush_interval: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_records: 1000,
            flush_interval: Duration::from_secs(300),
        }
    }
}

impl From<&TelemetryConfig> for FlushPolicy {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            max_records: config.max_records.max(1),
            flush_interval: config.flush_interval,
        }
    }
}

/// Destination of flushed batches
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Deliver one batch
    async fn send(&self, batch: &TelemetryBatch) -> Result<()>;
}

/// Sink that discards every batch
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetrySink;

#[async_trait]
impl TelemetrySink for NoopTelemetrySink {
    async fn send(&self, batch: &TelemetryBatch) -> Result<()> {
        tracing::trace!(records = batch.logs.len(), "discarding telemetry batch");
        Ok(())
    }
}

/// Sink that POSTs batches as JSON
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
}

impl HttpTelemetrySink {
    /// Create a sink posting to `endpoint`
    pub fn new(endpoint: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            retry,
        }
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn send(&self, batch: &TelemetryBatch) -> Result<()> {
        let client = &self.client;
        let endpoint = self.endpoint.as_str();
        with_retry(&self.retry, move || async move {
            client
                .post(endpoint)
                .json(batch)
                .timeout(Duration::from_secs(30))
                .send()
                .await?
                .error_for_status()?;
            Ok::<(), Error>(())
        })
        .await
    }
}

struct Shared {
    records: Mutex<Vec<TelemetryRecord>>,
    policy: FlushPolicy,
    sink: Arc<dyn TelemetrySink>,
    api_key: Option<String>,
    version: String,
}

impl Shared {
    async fn flush(&self) {
        let logs = {
            let mut records = self.records.lock().await;
            if records.is_empty() {
                return;
            }
            std::mem::take(&mut *records)
        };
        self.send(logs).await;
    }

    async fn send(&self, logs: Vec<TelemetryRecord>) {
        let count = logs.len();
        let batch = TelemetryBatch {
            api_key: self.api_key.clone(),
            version: self.version.clone(),
            logs,
        };

        match self.sink.send(&batch).await {
            Ok(()) => tracing::debug!(records = count, "flushed telemetry"),
            Err(e) => {
                tracing::warn!(records = count, error = %e, "failed to flush telemetry, dropping batch")
            }
        }
    }
}

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Bounded telemetry buffer with a start/stop lifecycle
pub struct TelemetryBuffer {
    shared: Arc<Shared>,
    ticker: Mutex<Option<Ticker>>,
    /// Size-triggered sends still running
    in_flight: Mutex<JoinSet<()>>,
}

impl TelemetryBuffer {
    /// Create a buffer flushing to `sink` under `policy`
    pub fn new(
        policy: FlushPolicy,
        sink: Arc<dyn TelemetrySink>,
        api_key: Option<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(Vec::new()),
                policy,
                sink,
                api_key,
                version: version.into(),
            }),
            ticker: Mutex::new(None),
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Build the buffer described by `config`
    ///
    /// Disabled telemetry (or a missing endpoint) gets a [`NoopTelemetrySink`].
    pub fn from_config(config: &TelemetryConfig) -> Self {
        let sink: Arc<dyn TelemetrySink> = match (&config.endpoint, config.enabled) {
            (Some(endpoint), true) => {
                Arc::new(HttpTelemetrySink::new(endpoint.clone(), config.retry.clone()))
            }
            _ => Arc::new(NoopTelemetrySink),
        };
        Self::new(
            FlushPolicy::from(config),
            sink,
            config.api_key.clone(),
            config.version.clone(),
        )
    }

    /// Buffer that drops everything
    pub fn noop() -> Self {
        Self::new(
            FlushPolicy::default(),
            Arc::new(NoopTelemetrySink),
            None,
            env!("CARGO_PKG_VERSION"),
        )
    }

    /// Append a record, starting a background flush when the buffer is full
    pub async fn record(&self, record: TelemetryRecord) {
        let full = {
            let mut records = self.shared.records.lock().await;
            records.push(record);
            if records.len() >= self.shared.policy.max_records {
                Some(std::mem::take(&mut *records))
            } else {
                None
            }
        };

        if let Some(logs) = full {
            let shared = self.shared.clone();
            let mut in_flight = self.in_flight.lock().await;
            while in_flight.try_join_next().is_some() {}
            in_flight.spawn(async move { shared.send(logs).await });
        }
    }

    /// Wait for background sends started by [`record`](Self::record)
    async fn drain_in_flight(&self) {
        let mut sends = std::mem::take(&mut *self.in_flight.lock().await);
        while let Some(result) = sends.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "telemetry send ended abnormally");
            }
        }
    }

    /// Number of buffered records
    pub async fn len(&self) -> usize {
        self.shared.records.lock().await.len()
    }

    /// Whether nothing is buffered
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Send everything buffered now and wait for background sends
    pub async fn flush(&self) {
        self.drain_in_flight().await;
        self.shared.flush().await;
    }

    /// Start the periodic flush ticker
    ///
    /// A second call while the ticker is running does nothing.
    pub async fn start(&self) {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let token = cancel.clone();
        let period = shared.policy.flush_interval;
        if period.is_zero() {
            tracing::warn!("telemetry flush interval is zero, periodic flush disabled");
            return;
        }

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => shared.flush().await,
                    _ = token.cancelled() => break,
                }
            }
        });

        *ticker = Some(Ticker { cancel, handle });
        tracing::debug!(interval_secs = period.as_secs(), "telemetry ticker started");
    }

    /// Stop the ticker and flush what remains
    pub async fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.cancel.cancel();
            if let Err(e) = ticker.handle.await {
                tracing::warn!(error = %e, "telemetry ticker ended abnormally");
            }
        }
        self.flush().await;
    }

    /// Whether the periodic ticker is running
    pub async fn is_started(&self) -> bool {
        self.ticker.lock().await.is_some()
    }
}
