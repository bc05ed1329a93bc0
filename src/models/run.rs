//! Run Models
//!
//! The per-invocation result record and its error entries.

use serde::{Deserialize, Serialize};

/// Terminal status of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Parse from a database string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One accumulated, non-fatal error from a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    /// Phase the error occurred in, if attributable
    pub phase_id: Option<String>,
    /// Error message
    pub message: String,
}

impl RunError {
    pub fn new(phase_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            phase_id,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.phase_id {
            Some(phase) => write!(f, "[{}] {}", phase, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of `run_once`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identifier
    pub run_id: String,
    /// Terminal status
    pub status: RunStatus,
    /// Phases that reached Completed this invocation (resumed phases included)
    pub phases_completed: usize,
    /// Proposals applied to the plan repository
    pub proposals_applied: usize,
    /// Proposals still awaiting approval when the run ended
    pub proposals_pending_approval: usize,
    /// Accumulated non-fatal errors
    pub errors: Vec<RunError>,
}

impl RunResult {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            phases_completed: 0,
            proposals_applied: 0,
            proposals_pending_approval: 0,
            errors: Vec::new(),
        }
    }

    /// Record a non-fatal error.
    pub fn push_error(&mut self, phase_id: Option<String>, message: impl Into<String>) {
        self.errors.push(RunError::new(phase_id, message));
    }
}
