//! Exponential backoff for transient failures
//!
//! Used by outbound HTTP calls that may hit a busy or briefly unreachable peer
//! (the telemetry sink). Continuation dispatch is deliberately not retried; a
//! failed dispatch stalls the chain until it is resumed.
//!
//! ```no_run
//! use taskchain::config::RetryConfig;
//! use taskchain::retry::with_retry;
//! use taskchain::Error;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let body = with_retry(&config, || async {
//!     Ok::<String, Error>("sent".to_string())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient (worth retrying) or permanent
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Timeouts, refused connections, 5xx and 429 responses
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|status| {
                        status.is_server_error()
                            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Serialization(_)
            | Error::NotFound(_)
            | Error::Validation(_)
            | Error::ShuttingDown
            | Error::Dispatch(_)
            | Error::Processor(_)
            | Error::Telemetry(_)
            | Error::ApiServerError(_)
            | Error::Other(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// `config.max_attempts` counts retries after the first try, so the operation
/// runs at most `max_attempts + 1` times. Delays grow by
/// `backoff_multiplier` and are capped at `max_delay`.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        let e = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !e.is_retryable() {
            tracing::debug!(error = %e, "Operation failed with non-retryable error");
            return Err(e);
        }
        if attempt >= config.max_attempts {
            tracing::warn!(
                error = %e,
                attempts = attempt + 1,
                "Operation failed after all retry attempts exhausted"
            );
            return Err(e);
        }

        attempt += 1;
        let wait = if config.jitter {
            add_jitter(delay)
        } else {
            delay
        };

        tracing::warn!(
            error = %e,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::time::sleep(wait).await;
        delay = next_delay(delay, config);
    }
}

fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay)
}

/// Stretch `delay` by a random factor in `[1.0, 2.0]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
