//! Error Handling
//!
//! Unified error types for the engine.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite errors (auto-converted from rusqlite::Error)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Analyzer invocation errors (transient; subject to retry)
    #[error("Analyzer error: {0}")]
    Analyzer(String),

    /// A proposal that cannot be applied (unknown plan, empty merge set, ...)
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    /// Starting a phase whose prerequisites are unmet. Fatal: the
    /// dependency graph is corrupted, not the data.
    #[error("Prerequisite violation: {0}")]
    PrerequisiteViolation(String),

    /// Illegal phase status transition
    #[error("Invalid phase transition: {0}")]
    InvalidTransition(String),

    /// Run was cancelled between phases
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine errors
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an analyzer error
    pub fn analyzer(msg: impl Into<String>) -> Self {
        Self::Analyzer(msg.into())
    }

    /// Create an invalid-proposal error
    pub fn invalid_proposal(msg: impl Into<String>) -> Self {
        Self::InvalidProposal(msg.into())
    }

    /// Create a prerequisite-violation error
    pub fn prerequisite(msg: impl Into<String>) -> Self {
        Self::PrerequisiteViolation(msg.into())
    }

    /// Create an invalid-transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is fatal for the whole run.
    ///
    /// Only prerequisite violations stop a run; everything else is
    /// accumulated into the run result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::PrerequisiteViolation(_))
    }
}

impl From<EngineError> for String {
    fn from(err: EngineError) -> String {
        err.to_string()
    }
}
