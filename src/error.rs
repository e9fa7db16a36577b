//! Error types for taskchain
//!
//! This module provides:
//! - The crate-wide [`Error`] type and [`Result`] alias
//! - [`TurnError`], the classification recorded on failed sub-tasks
//! - HTTP status code mapping and JSON error bodies for the invocation API

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{SubTaskErrorDetail, TurnErrorSummary};

/// Result type alias for taskchain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for taskchain
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "runner.max_concurrent_turns")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task or sub-task not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Request rejected before any state was written
    #[error("validation error: {0}")]
    Validation(String),

    /// Shutdown in progress - not accepting new invocations
    #[error("shutdown in progress: not accepting new invocations")]
    ShuttingDown,

    /// Continuation could not be dispatched
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// Item processor failed
    #[error("processor failed: {0}")]
    Processor(String),

    /// Telemetry flush failed
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Why a turn could not process its sub-task
///
/// Only `DispatchFailure` affects the chain itself; every other variant is
/// confined to a single sub-task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TurnError {
    /// The sub-task is absent or already handled (expected end-of-chain signal)
    #[error("sub-task {sub_task_id} is not pending")]
    NotPending {
        /// Padded sub-task id
        sub_task_id: String,
    },

    /// The referenced item could not be resolved
    #[error("unable to load item \"{item_id}\"")]
    ItemNotFound {
        /// Item id from the sub-task input
        item_id: String,
    },

    /// The item processor returned an error
    #[error("{message}")]
    ProcessorFailure {
        /// Error kind reported by the processor
        name: String,
        /// Error message
        message: String,
    },

    /// Reading the sub-task failed; the turn could not tell whether work remains
    #[error("failed to read sub-task: {0}")]
    StoreReadFailure(String),

    /// A status write failed; the recorded status may be stale
    #[error("failed to write sub-task status: {0}")]
    StoreWriteFailure(String),

    /// The continuation could not be dispatched
    #[error("failed to dispatch continuation: {0}")]
    DispatchFailure(String),

    /// The sub-task stayed PROCESSING longer than the stall timeout
    #[error("sub-task {sub_task_id} timed out while processing")]
    TimedOut {
        /// Padded sub-task id
        sub_task_id: String,
    },
}

impl TurnError {
    /// Stable classification code stored on failed sub-tasks
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::NotPending { .. } => "SUBTASK_NOT_PENDING",
            TurnError::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            TurnError::ProcessorFailure { .. } => "PROCESSOR_FAILURE",
            TurnError::StoreReadFailure(_) => "STORE_READ_FAILURE",
            TurnError::StoreWriteFailure(_) => "STORE_WRITE_FAILURE",
            TurnError::DispatchFailure(_) => "DISPATCH_FAILURE",
            TurnError::TimedOut { .. } => "TIMED_OUT",
        }
    }

    /// Error kind recorded as the `name` of the error detail
    pub fn name(&self) -> String {
        match self {
            TurnError::NotPending { .. } => "NotPending".to_string(),
            TurnError::ItemNotFound { .. } => "NotFoundError".to_string(),
            TurnError::ProcessorFailure { name, .. } => name.clone(),
            TurnError::StoreReadFailure(_) => "StoreReadFailure".to_string(),
            TurnError::StoreWriteFailure(_) => "StoreWriteFailure".to_string(),
            TurnError::DispatchFailure(_) => "DispatchFailure".to_string(),
            TurnError::TimedOut { .. } => "TimedOut".to_string(),
        }
    }

    /// Detail persisted on the FAILED sub-task
    pub fn to_detail(&self) -> SubTaskErrorDetail {
        SubTaskErrorDetail {
            name: self.name(),
            message: self.to_string(),
            code: self.code().to_string(),
        }
    }

    /// Summary reported in the turn outcome
    pub fn to_summary(&self) -> TurnErrorSummary {
        TurnErrorSummary {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<Error> for TurnError {
    fn from(error: Error) -> Self {
        match error {
            Error::Processor(message) => TurnError::ProcessorFailure {
                name: "ProcessorError".to_string(),
                message,
            },
            Error::Dispatch(message) => TurnError::DispatchFailure(message),
            db @ (Error::Database(_) | Error::Sqlx(_)) => {
                TurnError::StoreWriteFailure(db.to_string())
            }
            other => TurnError::ProcessorFailure {
                name: error_kind(&other).to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Short kind name for an [`Error`], used as a processor failure `name`
fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::Config { .. } => "ConfigError",
        Error::Database(_) | Error::Sqlx(_) => "DatabaseError",
        Error::Io(_) => "IoError",
        Error::Network(_) => "NetworkError",
        Error::Serialization(_) => "SerializationError",
        Error::NotFound(_) => "NotFoundError",
        Error::Validation(_) => "ValidationError",
        Error::ShuttingDown => "ShuttingDown",
        Error::Dispatch(_) => "DispatchFailure",
        Error::Processor(_) => "ProcessorError",
        Error::Telemetry(_) => "TelemetryError",
        Error::ApiServerError(_) => "ApiServerError",
        Error::Other(_) => "Error",
    }
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "not found: task 12",
///     "details": { "task_id": 12 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::Validation(_) => 422,
            Error::NotFound(_) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Processor(_) => 500,
            Error::Telemetry(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            Error::Network(_) => 502,
            Error::Dispatch(_) => 502,

            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(DatabaseError::NotFound(_)) => "not_found",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation_error",
            Error::ShuttingDown => "shutting_down",
            Error::Dispatch(_) => "dispatch_failed",
            Error::Processor(_) => "processor_failed",
            Error::Telemetry(_) => "telemetry_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError {
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
                details: None,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_error_codes_are_stable() {
        let cases = vec![
            (
                TurnError::NotPending {
                    sub_task_id: "00001".into(),
                },
                "SUBTASK_NOT_PENDING",
            ),
            (
                TurnError::ItemNotFound {
                    item_id: "b-1".into(),
                },
                "ITEM_NOT_FOUND",
            ),
            (
                TurnError::ProcessorFailure {
                    name: "ZipError".into(),
                    message: "disk full".into(),
                },
                "PROCESSOR_FAILURE",
            ),
            (
                TurnError::StoreReadFailure("closed".into()),
                "STORE_READ_FAILURE",
            ),
            (
                TurnError::StoreWriteFailure("locked".into()),
                "STORE_WRITE_FAILURE",
            ),
            (
                TurnError::DispatchFailure("closed".into()),
                "DISPATCH_FAILURE",
            ),
            (
                TurnError::TimedOut {
                    sub_task_id: "00002".into(),
                },
                "TIMED_OUT",
            ),
        ];

        for (error, code) in cases {
            assert_eq!(error.code(), code);
            assert_eq!(error.to_detail().code, code);
            assert_eq!(error.to_summary().code, code);
        }
    }

    #[test]
    fn item_not_found_detail_names_the_item() {
        let detail = TurnError::ItemNotFound {
            item_id: "block-9".into(),
        }
        .to_detail();
        assert_eq!(detail.name, "NotFoundError");
        assert_eq!(detail.message, "unable to load item \"block-9\"");
    }

    #[test]
    fn processor_failure_keeps_reported_name() {
        let error = TurnError::ProcessorFailure {
            name: "ZipError".into(),
            message: "disk full".into(),
        };
        assert_eq!(error.name(), "ZipError");
        assert_eq!(error.to_string(), "disk full");
    }

    #[test]
    fn crate_errors_convert_to_turn_errors() {
        let processor: TurnError = Error::Processor("boom".into()).into();
        assert_eq!(processor.code(), "PROCESSOR_FAILURE");
        assert_eq!(processor.name(), "ProcessorError");

        let io: TurnError =
            Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).into();
        assert_eq!(io.code(), "PROCESSOR_FAILURE");
        assert_eq!(io.name(), "IoError");

        let db: TurnError = Error::Database(DatabaseError::QueryFailed("locked".into())).into();
        assert_eq!(db.code(), "STORE_WRITE_FAILURE");

        let dispatch: TurnError = Error::Dispatch("closed".into()).into();
        assert_eq!(dispatch.code(), "DISPATCH_FAILURE");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(Error::NotFound("task 1".into()).status_code(), 404);
        assert_eq!(Error::Validation("empty".into()).status_code(), 422);
        assert_eq!(Error::ShuttingDown.status_code(), 503);
        assert_eq!(Error::Dispatch("x".into()).status_code(), 502);
        assert_eq!(
            Error::Database(DatabaseError::NotFound("x".into())).error_code(),
            "not_found"
        );
        assert_eq!(
            Error::Database(DatabaseError::QueryFailed("x".into())).error_code(),
            "database_error"
        );
    }

    #[test]
    fn api_error_from_error_carries_code_and_message() {
        let api: ApiError = Error::NotFound("task 12".into()).into();
        assert_eq!(api.error.code, "not_found");
        assert_eq!(api.error.message, "not found: task 12");
        assert!(api.error.details.is_none());
    }
}
