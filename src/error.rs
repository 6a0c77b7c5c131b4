//! Error handling module for tfmigrate
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Each variant names the migration step that failed so an operator can tell
//! from the message alone where a run stopped.

use thiserror::Error;

use crate::tfexec::ToolError;

/// Main error type for tfmigrate
#[derive(Error, Debug)]
pub enum MigrateError {
    /// The tool could not be executed or reported an unrecognized version
    #[error("terraform is not available: {0}")]
    ToolUnavailable(String),

    /// `init` failed against the configured or overridden backend
    #[error("terraform init failed: {0}")]
    InitializationFailed(String),

    /// `state pull` failed
    #[error("failed to pull current state: {0}")]
    StateFetchFailed(String),

    /// A migration action rejected its input or could not produce a new state
    #[error("action #{index} ({action}) failed: {reason}")]
    ActionFailed {
        index: usize,
        action: String,
        reason: String,
    },

    /// The migrated state would change real infrastructure
    #[error("terraform plan detected unexpected diffs:\n{0}")]
    UnexpectedDiff(String),

    /// `plan` exited with something other than "no diff" or "diff detected"
    #[error("terraform plan failed: {0}")]
    DiffCheckFailed(String),

    /// `state push` failed
    #[error("failed to push new state: {0}")]
    PushFailed(String),

    /// History storage could not be read
    #[error("failed to read history storage: {0}")]
    StorageReadFailed(String),

    /// History storage could not be written
    #[error("failed to write history storage: {0}")]
    StorageWriteFailed(String),

    /// A tool invocation was cancelled by the operator or exceeded its timeout
    #[error("cancelled or timed out during {step}: {reason}")]
    CancelledOrTimedOut { step: String, reason: String },

    /// The backend override file could not be installed
    #[error("backend override error: {0}")]
    BackendOverride(String),

    /// A migration action string could not be parsed
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// A migration file is malformed
    #[error("invalid migration file: {0}")]
    InvalidMigration(String),

    /// The stored history blob is not a history this version understands
    #[error("invalid history format: {0}")]
    HistoryFormat(String),

    /// The migration pipeline attempted an out-of-order stage transition
    #[error("stage transition error: {0}")]
    StageTransition(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for tfmigrate operations
pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// Map a tool-level failure onto the error of the step that issued it.
    ///
    /// Cancellation and timeouts keep their own variant regardless of step.
    pub fn from_tool(step: &str, err: ToolError, wrap: impl FnOnce(String) -> Self) -> Self {
        match err {
            ToolError::Cancelled | ToolError::TimedOut(_) => Self::CancelledOrTimedOut {
                step: step.to_string(),
                reason: err.to_string(),
            },
            other => wrap(other.to_string()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid migration error
    pub fn invalid_migration(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Returns true if the run stopped because of an interrupt or timeout
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledOrTimedOut { .. })
    }
}
