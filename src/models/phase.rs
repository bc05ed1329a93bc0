//! Phase Models
//!
//! Execution state of named phases plus the static declarations the
//! orchestrator builds its dependency graph from.

use serde::{Deserialize, Serialize};

/// Execution status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
    /// An upstream mutation invalidated this phase's output
    NeedsRerun,
    /// Disabled by configuration; satisfies prerequisites like Completed
    Skipped,
}

impl PhaseStatus {
    /// Whether a dependent phase may start on top of this status.
    pub fn satisfies_prerequisite(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }

    /// Whether the phase still has work to do in this run.
    pub fn is_runnable(&self) -> bool {
        matches!(self, PhaseStatus::NotStarted | PhaseStatus::NeedsRerun)
    }

    /// Parse from a database string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(PhaseStatus::NotStarted),
            "in_progress" => Some(PhaseStatus::InProgress),
            "completed" => Some(PhaseStatus::Completed),
            "failed" => Some(PhaseStatus::Failed),
            "needs_rerun" => Some(PhaseStatus::NeedsRerun),
            "skipped" => Some(PhaseStatus::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::NotStarted => write!(f, "not_started"),
            PhaseStatus::InProgress => write!(f, "in_progress"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed => write!(f, "failed"),
            PhaseStatus::NeedsRerun => write!(f, "needs_rerun"),
            PhaseStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// The work a phase performs when the orchestrator runs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseKind {
    /// Invoke every analyzer against one document (cache-backed)
    Analyze { document_id: String },
    /// Cluster analyzer outputs into the consensus list
    Consensus,
    /// Run the gap/duplicate/obsolescence scans
    Detect,
    /// Apply proposals through the editor and approval gate
    Reconcile,
    /// Regenerate the phase status report
    Report,
}

/// Static declaration of one phase: identity, work, prerequisites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Unique phase identifier
    pub phase_id: String,
    /// What the phase does
    pub kind: PhaseKind,
    /// Phase ids that must be Completed or Skipped first
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Configured skip: the phase never runs but satisfies prerequisites
    #[serde(default)]
    pub skip: bool,
}

impl PhaseSpec {
    pub fn new(phase_id: impl Into<String>, kind: PhaseKind) -> Self {
        Self {
            phase_id: phase_id.into(),
            kind,
            prerequisites: Vec::new(),
            skip: false,
        }
    }

    pub fn with_prerequisites(mut self, prerequisites: Vec<String>) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }
}

/// Mutable execution record for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Phase identifier
    pub phase_id: String,
    /// Current status
    pub status: PhaseStatus,
    /// Declared prerequisites
    pub prerequisites: Vec<String>,
    /// Phases that list this one as a prerequisite (derived)
    pub dependents: Vec<String>,
    /// How many times the phase has run to completion or failure
    pub run_count: u32,
    /// Duration of the most recent run in milliseconds
    pub last_duration_ms: Option<u64>,
}

impl PhaseRecord {
    pub fn new(phase_id: impl Into<String>, prerequisites: Vec<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            status: PhaseStatus::NotStarted,
            prerequisites,
            dependents: Vec::new(),
            run_count: 0,
            last_duration_ms: None,
        }
    }
}
