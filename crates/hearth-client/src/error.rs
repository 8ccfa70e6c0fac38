//! Error types for engine sessions.

use std::fmt;
use std::time::Duration;

use hearth_protocol::{DocumentError, ErrorPayload, Version, VersionRange};
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning, connecting to, or querying an
/// engine.
///
/// Failure kinds before a live Session exists (`Config` through
/// `VersionMismatch`) abort `connect` entirely. Per-query kinds
/// (`InvalidQuery`, `ExecuteTimeout`, `Query`, `Exec`, `Decode`) are scoped
/// to one call and leave the Session usable. A `Transport` failure breaks
/// the Session: every later call reports `Session` until it is closed.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid connection parameters, rejected before provisioning
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Engine artifact could not be located, installed, or started
    #[error("Provisioning failed: {0}")]
    Provision(String),

    /// Fetching the engine artifact failed (network or integrity)
    #[error("Download failed: {0}")]
    Download(String),

    /// Channel to a located or spawned engine could not be opened
    #[error("Connection failed: {0}")]
    Connection(String),

    /// An open channel failed during use (I/O, EOF, framing)
    #[error("Transport failed: {0}")]
    Transport(String),

    /// Engine version is outside the supported compatibility range
    #[error("Engine version {engine} is outside the supported range ({required})")]
    VersionMismatch {
        engine: Version,
        required: VersionRange,
    },

    /// Session-lifecycle failure not covered by the kinds above
    #[error("Session error: {0}")]
    Session(String),

    /// Query document rejected before being sent
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] DocumentError),

    /// Query exceeded its allotted time awaiting a response
    #[error("Query timed out after {limit:?}")]
    ExecuteTimeout { limit: Duration },

    /// Engine reported a structured error for a well-formed query
    #[error("{0}")]
    Query(QueryFailure),

    /// A requested operation failed during the engine's execution of it
    #[error("{0}")]
    Exec(ExecFailure),

    /// Reply data did not match the caller's expected result shape
    #[error("Failed to decode reply data: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Structured error detail from a `Query` failure.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    pub errors: Vec<ErrorPayload>,
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "Engine reported an unspecified query error"),
            [only] => write!(f, "Engine reported a query error: {}", only.message),
            [first, rest @ ..] => write!(
                f,
                "Engine reported a query error: {} (and {} more)",
                first.message,
                rest.len()
            ),
        }
    }
}

/// Detail of an operation that failed while the engine executed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecFailure {
    /// Name of the failing operation, from the payload's path or explicit
    /// operation field.
    pub operation: String,
    /// Engine-side diagnostic message.
    pub message: String,
    /// Exit status of the external command, when one was involved.
    pub exit_code: Option<i32>,
    /// Captured stderr of the external command, when available.
    pub stderr: Option<String>,
}

impl fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation `{}` failed: {}", self.operation, self.message)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        Ok(())
    }
}
