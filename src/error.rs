//! Error types for Forgeops.
//!
//! One enum covers the whole engine: plan parsing, plan loading, execution
//! and state reconciliation. Parse errors always carry the source line and
//! column so the loader can point at the offending spot.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Forgeops operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Forgeops.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Plan Errors
    // ========================================================================
    /// Malformed DSL source. Line and column are 1-based.
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        /// Source line (1-based)
        line: usize,
        /// Source column (1-based)
        column: usize,
        /// What went wrong
        message: String,
    },

    /// Error loading a plan file (parse error decorated with its origin,
    /// include cycle, unreadable file, ...).
    #[error("failed to load plan '{}': {message}", path.display())]
    PlanLoad {
        /// Path to the plan file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A task referenced a host that is not declared in the plan.
    #[error("host '{0}' is not defined in the plan")]
    HostNotFound(String),

    /// A host asked for a connection mode the engine does not implement.
    #[error("connection '{connection}' for host '{host}' is not implemented: {message}")]
    UnsupportedConnection {
        /// Host name
        host: String,
        /// Requested connection mode
        connection: String,
        /// Why it is unavailable
        message: String,
    },

    // ========================================================================
    // Operation Errors
    // ========================================================================
    /// Invalid or missing fields for an operation kind, raised at
    /// construction time.
    #[error("invalid arguments for operation '{operation}': {message}")]
    OperationArgs {
        /// Operation kind
        operation: String,
        /// Error message
        message: String,
    },

    /// A runtime fault while an operation performed its side effects.
    #[error("operation '{operation}' failed: {message}")]
    OperationExecution {
        /// Operation kind
        operation: String,
        /// Error message
        message: String,
    },

    /// An external command exited nonzero while `check` was requested.
    #[error("command '{command}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit code (-1 when killed by a signal or timed out)
        code: i32,
        /// Captured stderr, trimmed
        stderr: String,
    },

    /// An external command exceeded its configured timeout.
    #[error("command '{command}' timed out after {timeout_secs}s")]
    CommandTimeout {
        /// Rendered command line
        command: String,
        /// Configured timeout in seconds
        timeout_secs: u64,
    },

    // ========================================================================
    // State Errors
    // ========================================================================
    /// State store persistence fault.
    #[error("state store error: {0}")]
    State(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Engine configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Template rendering error.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

impl Error {
    /// Creates a new parse error at the given source position.
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    /// Creates a new plan load error.
    pub fn plan_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PlanLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new operation argument error.
    pub fn operation_args(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationArgs {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a new operation execution error.
    pub fn operation_execution(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationExecution {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Source position carried by parse errors, if any.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            Error::Parse { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }
}
