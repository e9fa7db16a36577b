//! Configuration types for taskchain

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Main configuration for [`ChainProcessor`](crate::ChainProcessor)
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Turn execution (concurrency, timeouts)
    #[serde(default)]
    pub runner: RunnerConfig,

    /// How continuations are dispatched
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Item resolution and export output locations
    #[serde(default)]
    pub export: ExportConfig,

    /// Per-invocation telemetry batching
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Invocation API server
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Check settings that would otherwise only fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.runner.max_concurrent_turns == 0 {
            return Err(config_error(
                "max_concurrent_turns must be at least 1",
                "runner.max_concurrent_turns",
            ));
        }
        if self.runner.queue_capacity == 0 {
            return Err(config_error(
                "queue_capacity must be at least 1",
                "runner.queue_capacity",
            ));
        }

        for (key, value) in [
            ("runner.turn_timeout", self.runner.turn_timeout),
            ("runner.stall_timeout", self.runner.stall_timeout),
            ("dispatch.timeout", self.dispatch.timeout),
            ("telemetry.flush_interval", self.telemetry.flush_interval),
        ] {
            if value.is_zero() {
                return Err(config_error("must be greater than zero", key));
            }
        }

        if self.dispatch.mode == DispatchMode::Http {
            for (key, value) in [
                ("dispatch.process_url", &self.dispatch.process_url),
                ("dispatch.finalize_url", &self.dispatch.finalize_url),
            ] {
                let Some(raw) = value else {
                    return Err(config_error("required when dispatch mode is http", key));
                };
                url::Url::parse(raw)
                    .map_err(|e| config_error(&format!("invalid URL '{}': {}", raw, e), key))?;
            }
        }

        if self.telemetry.enabled {
            let Some(endpoint) = &self.telemetry.endpoint else {
                return Err(config_error(
                    "required when telemetry is enabled",
                    "telemetry.endpoint",
                ));
            };
            url::Url::parse(endpoint).map_err(|e| {
                config_error(
                    &format!("invalid URL '{}': {}", endpoint, e),
                    "telemetry.endpoint",
                )
            })?;
            if self.telemetry.max_records == 0 {
                return Err(config_error(
                    "max_records must be at least 1",
                    "telemetry.max_records",
                ));
            }
        }

        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: format!("{}: {}", key, message),
        key: Some(key.to_string()),
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./taskchain.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Turn execution configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum turns executing at once across all chains (default: 4)
    ///
    /// Turns of the same chain are always sequential; this only bounds how many
    /// different chains advance concurrently.
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,

    /// Capacity of the in-process invocation queue (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on a single turn (default: 15 minutes)
    ///
    /// A turn that exceeds it is abandoned; its sub-task stays PROCESSING until
    /// recovered with `resume_task`.
    #[serde(default = "default_turn_timeout", with = "duration_serde")]
    pub turn_timeout: Duration,

    /// Age after which a PROCESSING sub-task is considered stalled (default: 15 minutes)
    #[serde(default = "default_turn_timeout", with = "duration_serde")]
    pub stall_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_turns: default_max_concurrent_turns(),
            queue_capacity: default_queue_capacity(),
            turn_timeout: default_turn_timeout(),
            stall_timeout: default_turn_timeout(),
        }
    }
}

/// Continuation dispatch mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// In-process queue drained by the chain runner (default)
    #[default]
    Channel,
    /// HTTP POST to the process/finalize invocation endpoints
    Http,
}

/// Continuation dispatch configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Dispatch mode
    #[serde(default)]
    pub mode: DispatchMode,

    /// URL receiving process invocations (http mode)
    #[serde(default)]
    pub process_url: Option<String>,

    /// URL receiving finalize invocations (http mode)
    #[serde(default)]
    pub finalize_url: Option<String>,

    /// Timeout for a dispatch request (default: 30 seconds)
    #[serde(default = "default_dispatch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// API key sent as `X-Api-Key` (http mode)
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            process_url: None,
            finalize_url: None,
            timeout: default_dispatch_timeout(),
            api_key: None,
        }
    }
}

/// Item resolution and export output configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory holding one `<item_id>.json` file per item (default: "./items")
    #[serde(default = "default_items_dir")]
    pub items_dir: PathBuf,

    /// Directory receiving one zip archive per processed item (default: "./exports")
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            items_dir: default_items_dir(),
            export_dir: default_export_dir(),
        }
    }
}

/// Telemetry batching configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether telemetry is collected and sent (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Endpoint receiving telemetry batches
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key included in each batch
    #[serde(default)]
    pub api_key: Option<String>,

    /// Version string included in each batch (default: "1.0.0")
    #[serde(default = "default_telemetry_version")]
    pub version: String,

    /// Flush as soon as this many records are buffered (default: 1000)
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Flush a non-empty buffer at least this often (default: 5 minutes)
    #[serde(default = "default_flush_interval", with = "duration_serde")]
    pub flush_interval: Duration,

    /// Retry behavior for sending batches
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            version: default_telemetry_version(),
            max_records: default_max_records(),
            flush_interval: default_flush_interval(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Invocation API server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key required in the `X-Api-Key` header
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./taskchain.db")
}

fn default_max_concurrent_turns() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_turn_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_items_dir() -> PathBuf {
    PathBuf::from("./items")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_telemetry_version() -> String {
    "1.0.0".to_string()
}

fn default_max_records() -> usize {
    1000
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.runner.max_concurrent_turns, 4);
        assert_eq!(config.runner.queue_capacity, 1024);
        assert_eq!(config.runner.turn_timeout, Duration::from_secs(900));
        assert_eq!(config.dispatch.mode, DispatchMode::Channel);
        assert_eq!(config.telemetry.max_records, 1000);
        assert_eq!(config.telemetry.flush_interval, Duration::from_secs(300));
        assert!(!config.telemetry.enabled);
        assert_eq!(config.server.bind_address.port(), 6790);
        config.validate().unwrap();
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["runner"]["turn_timeout"], 900);
        assert_eq!(json["dispatch"]["timeout"], 30);

        let config: Config =
            serde_json::from_str(r#"{"runner": {"turn_timeout": 5, "stall_timeout": 60}}"#)
                .unwrap();
        assert_eq!(config.runner.turn_timeout, Duration::from_secs(5));
        assert_eq!(config.runner.stall_timeout, Duration::from_secs(60));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.runner.max_concurrent_turns = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config { key: Some(ref k), .. } if k == "runner.max_concurrent_turns"
        ));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let cases: [(&str, fn(&mut Config)); 4] = [
            ("runner.turn_timeout", |c| c.runner.turn_timeout = Duration::ZERO),
            ("runner.stall_timeout", |c| c.runner.stall_timeout = Duration::ZERO),
            ("dispatch.timeout", |c| c.dispatch.timeout = Duration::ZERO),
            ("telemetry.flush_interval", |c| {
                c.telemetry.flush_interval = Duration::ZERO
            }),
        ];

        for (expected, zero) in cases {
            let mut config = Config::default();
            zero(&mut config);
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, Error::Config { key: Some(ref k), .. } if k == expected),
                "{} accepted a zero duration: {:?}",
                expected,
                err
            );
        }

        // Sub-second values are fine
        let mut config = Config::default();
        config.telemetry.flush_interval = Duration::from_millis(50);
        config.runner.turn_timeout = Duration::from_millis(100);
        config.validate().unwrap();
    }

    #[test]
    fn validate_requires_urls_in_http_mode() {
        let mut config = Config::default();
        config.dispatch.mode = DispatchMode::Http;
        config.dispatch.process_url = Some("http://localhost:6790/invoke/process".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config { key: Some(ref k), .. } if k == "dispatch.finalize_url"
        ));

        config.dispatch.finalize_url = Some("not a url".into());
        assert!(config.validate().is_err());

        config.dispatch.finalize_url = Some("http://localhost:6790/invoke/finalize".into());
        config.validate().unwrap();
    }

    #[test]
    fn validate_requires_endpoint_when_telemetry_enabled() {
        let mut config = Config::default();
        config.telemetry.enabled = true;
        assert!(config.validate().is_err());

        config.telemetry.endpoint = Some("https://telemetry.example.com/telemetry".into());
        config.validate().unwrap();
    }
}
