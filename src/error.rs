//! Error taxonomy for the resilient client.
//!
//! Every variant corresponds to one row of the error taxonomy table; the
//! retry policy for each kind is centralized in [`Error::is_retryable`] so
//! the executor and any future caller agree on one source of truth.

use thiserror::Error;

/// Errors produced by the resilient client.
#[derive(Debug, Error)]
pub enum Error {
    /// No host can serve the request.
    #[error("no host available to serve the request")]
    HostUnavailable,

    /// Driver-level timeout.
    #[error("operation timed out")]
    OperationTimeout,

    /// Replica read timeout.
    #[error("read timeout: {0}")]
    ReadTimeout(String),

    /// Replica write timeout.
    #[error("write timeout: {0}")]
    WriteTimeout(String),

    /// Insufficient replicas for the requested consistency level.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Driver reported an execution error; retryable only if the message
    /// indicates a timeout (see [`Error::is_retryable`]).
    #[error("query execution failed: {0}")]
    QueryExecution(String),

    /// Semantic/programmer error in the statement itself.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Caller is not authorized to run the statement.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Bad argument passed by the caller or found in configuration.
    #[error("argument error: {0}")]
    ArgumentError(String),

    /// Invalid configuration supplied at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Mode gate rejected the call: no hosts are up.
    #[error("client is in emergency mode: no hosts are up")]
    EmergencyMode,

    /// Mode gate rejected a write while the client is read-only.
    #[error("client is in read-only mode: writes are rejected")]
    ReadOnlyMode,

    /// Initial or recreation connection attempt failed.
    #[error("connection failed: {0}")]
    ConnectionFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Escape hatch for a driver error that does not cleanly map onto one
    /// of the rows above; retryable only if its message indicates a timeout,
    /// same rule as [`Error::QueryExecution`].
    #[error("driver error: {0}")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Whether the retry wrapper in [`crate::executor::QueryExecutor`] should
    /// consume this error and try again, per the §7 propagation policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::HostUnavailable
            | Error::OperationTimeout
            | Error::ReadTimeout(_)
            | Error::WriteTimeout(_)
            | Error::Unavailable(_) => true,
            Error::QueryExecution(message) => message_indicates_timeout(message),
            Error::Driver(source) => message_indicates_timeout(&source.to_string()),
            Error::InvalidQuery(_)
            | Error::Unauthorized(_)
            | Error::ArgumentError(_)
            | Error::EmergencyMode
            | Error::ReadOnlyMode
            | Error::InvalidConfig(_)
            | Error::ConnectionFailure(_) => false,
        }
    }

    /// Whether the mode gate / non-retryable errors should bypass the retry
    /// wrapper entirely and fail the call immediately.
    #[must_use]
    pub fn is_mode_gate(&self) -> bool {
        matches!(self, Error::EmergencyMode | Error::ReadOnlyMode)
    }
}

fn message_indicates_timeout(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("timeout") || lower.contains("timed out")
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
