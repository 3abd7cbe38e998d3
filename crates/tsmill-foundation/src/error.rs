//! Error handling for tsmill
//!
//! `TsMillError` is the single error type returned by the protocol client,
//! the edit engine and the configuration layer. Components at or above the
//! readiness guard convert it into an [`OperationResult`](crate::OperationResult)
//! instead of letting it escape.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for convenience
pub type TsMillResult<T> = Result<T, TsMillError>;

/// Core error type used throughout tsmill
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TsMillError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Request '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("tsserver rejected '{command}': {message}")]
    Server { command: String, message: String },

    #[error("tsserver session is already running")]
    AlreadyRunning,

    #[error("tsserver session is not running")]
    NotRunning,

    #[error("tsserver session closed before '{command}' completed")]
    SessionClosed { command: String },

    #[error("Invalid edit: {message}")]
    InvalidEdit { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TsMillError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an I/O error bound to a path
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        Self::Io {
            message: format!("{}: {}", path.display(), source),
            path: Some(path),
            source: Some(source),
        }
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an error for a response whose `success` flag was false
    pub fn server(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn session_closed(command: impl Into<String>) -> Self {
        Self::SessionClosed {
            command: command.into(),
        }
    }

    /// Create a new invalid edit error
    pub fn invalid_edit(message: impl Into<String>) -> Self {
        Self::InvalidEdit {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is a bounded wait that ran out
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Remediation hint shown next to the message in user-facing results
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config { .. } => Some("Check the tsmill configuration (.tsmill/config.toml)"),
            Self::Timeout { .. } | Self::SessionClosed { .. } => {
                Some("Wait a few seconds for tsserver to finish loading, then retry")
            }
            Self::NotRunning | Self::AlreadyRunning => {
                Some("Restart the tsserver session and retry")
            }
            Self::Server { .. } => Some("Check the project configuration (tsconfig.json)"),
            Self::Io { .. } => Some("Verify the file exists and is readable"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TsMillError {
    fn from(err: std::io::Error) -> Self {
        TsMillError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TsMillError {
    fn from(err: serde_json::Error) -> Self {
        TsMillError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}
