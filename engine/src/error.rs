//! Error handling for the monitoring engine
//!
//! This module provides the error types for every engine operation:
//! scheduler lifecycle, metric store access, source adapter calls,
//! configuration loading and engine telemetry.

use std::io;

use thiserror::Error;

/// The main error type for the monitoring engine
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Scheduler lifecycle errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Metric store errors
    #[error("Metric store error: {0}")]
    Store(#[from] StoreError),

    /// Source adapter errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Engine telemetry errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Scheduler registry errors, returned synchronously to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("unknown task: {name}")]
    UnknownTask { name: String },

    #[error("invalid interval for task: {name}")]
    InvalidInterval { name: String },
}

/// Metric store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Record decoding failed for {table}: {reason}")]
    Decode { table: String, reason: String },

    #[error("Store connection unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Blocking store task failed: {reason}")]
    TaskJoin { reason: String },
}

/// Source adapter errors
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The source could not be reached; remaining steps for it are skipped
    #[error("{source_name} is unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("query against {source_name} failed: {reason}")]
    QueryFailed { source_name: String, reason: String },

    #[error("malformed response from {source_name}: {reason}")]
    MalformedResponse { source_name: String, reason: String },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },
}

/// Engine telemetry errors
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics export failed: {reason}")]
    ExportFailed { reason: String },

    #[error("Metric registration failed: {name}")]
    RegistrationFailed { name: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for scheduler operations
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// A specialized result type for metric store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A specialized result type for source adapter operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for telemetry operations
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

impl MonitorError {
    /// Check if the next scheduled tick can be expected to succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Scheduler(_) => false,
            MonitorError::Config(_) => false,
            MonitorError::Store(StoreError::Decode { .. }) => false,
            MonitorError::Source(_) => true,
            MonitorError::Io(io_error) => matches!(
                io_error.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => true,
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Scheduler(_) => "scheduler",
            MonitorError::Store(_) => "store",
            MonitorError::Source(_) => "source",
            MonitorError::Config(_) => "config",
            MonitorError::Metrics(_) => "metrics",
            MonitorError::Io(_) => "io",
            MonitorError::Serialization(_) => "serialization",
            MonitorError::Generic(_) => "generic",
        }
    }
}

impl SourceError {
    /// Connectivity failures mark the whole source unreachable for the sweep
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database { reason: err.to_string() }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::TaskJoin { reason: err.to_string() }
    }
}

impl From<String> for MonitorError {
    fn from(msg: String) -> Self {
        MonitorError::Generic(msg)
    }
}

impl From<&str> for MonitorError {
    fn from(msg: &str) -> Self {
        MonitorError::Generic(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let scheduler_error = MonitorError::Scheduler(SchedulerError::AlreadyRunning);
        assert_eq!(scheduler_error.category(), "scheduler");
        assert!(!scheduler_error.is_recoverable());

        let source_error = MonitorError::Source(SourceError::Unavailable {
            source_name: "light_admin".to_string(),
            reason: "connection refused".to_string(),
        });
        assert_eq!(source_error.category(), "source");
        assert!(source_error.is_recoverable());

        let store_error = MonitorError::Store(StoreError::Database { reason: "locked".to_string() });
        assert_eq!(store_error.category(), "store");
        assert!(store_error.is_recoverable());
    }

    #[test]
    fn test_scheduler_error_messages() {
        assert_eq!(SchedulerError::AlreadyRunning.to_string(), "scheduler is already running");
        assert_eq!(SchedulerError::NotRunning.to_string(), "scheduler is not running");
        let unknown = SchedulerError::UnknownTask { name: "backup".to_string() };
        assert_eq!(unknown.to_string(), "unknown task: backup");
    }

    #[test]
    fn test_source_error_availability() {
        let unavailable = SourceError::Unavailable {
            source_name: "redis".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(unavailable.is_unavailable());

        let failed = SourceError::QueryFailed {
            source_name: "redis".to_string(),
            reason: "syntax".to_string(),
        };
        assert!(!failed.is_unavailable());
    }

    #[test]
    fn test_error_conversion() {
        let monitor_error = MonitorError::from("Test error".to_string());
        assert!(matches!(monitor_error, MonitorError::Generic(_)));

        let monitor_error = MonitorError::from("Test error");
        assert!(matches!(monitor_error, MonitorError::Generic(_)));
    }
}
