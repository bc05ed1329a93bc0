//! Modification Proposals & Approval Requests
//!
//! A proposal is pure data until applied by the lifecycle editor. The
//! operation kind is a tagged sum type so the editor can match exhaustively.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::plan::{PlanDraft, PlanPatch};

/// The operation a proposal asks the editor to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalAction {
    /// Create a new plan from a draft
    Add { draft: PlanDraft },
    /// Patch fields of an existing plan, bumping its version
    Modify { plan_id: String, patch: PlanPatch },
    /// Soft-delete an existing plan
    Delete { plan_id: String, reason: String },
    /// Fold several plans into one new aggregate plan
    Merge {
        plan_ids: Vec<String>,
        target: PlanDraft,
    },
}

impl ProposalAction {
    /// Short lowercase label for logs and counters.
    pub fn label(&self) -> &'static str {
        match self {
            ProposalAction::Add { .. } => "add",
            ProposalAction::Modify { .. } => "modify",
            ProposalAction::Delete { .. } => "delete",
            ProposalAction::Merge { .. } => "merge",
        }
    }

    /// Whether this action retires data (and therefore never auto-applies).
    pub fn is_delete(&self) -> bool {
        matches!(self, ProposalAction::Delete { .. })
    }
}

/// A proposed mutation of the plan repository, carrying the confidence used
/// by the auto-approve gate and a human-readable rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationProposal {
    /// Unique identifier, used for journaling and approval tracking
    pub proposal_id: String,
    /// The requested operation
    pub action: ProposalAction,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Why the detector proposed this
    pub rationale: String,
}

impl ModificationProposal {
    pub fn new(action: ProposalAction, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            proposal_id: Uuid::new_v4().to_string(),
            action,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
        }
    }

    /// One-line summary for approval prompts and logs.
    pub fn summary(&self) -> String {
        let target = match &self.action {
            ProposalAction::Add { draft } => format!("\"{}\"", draft.title),
            ProposalAction::Modify { plan_id, .. } => plan_id.clone(),
            ProposalAction::Delete { plan_id, .. } => plan_id.clone(),
            ProposalAction::Merge { plan_ids, target } => {
                format!("{} -> \"{}\"", plan_ids.join(" + "), target.title)
            }
        };
        format!(
            "{} {} (confidence {:.2}): {}",
            self.action.label(),
            target,
            self.confidence,
            self.rationale
        )
    }
}

/// Resolution state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    /// No human answered within the timeout; treated as rejected
    TimedOut,
}

impl ApprovalStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    /// Parse from a database string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "timed_out" => Some(ApprovalStatus::TimedOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One human-in-the-loop checkpoint. Maps 1:1 to a proposal whose
/// confidence fell below the auto-approve threshold (or any DELETE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique identifier presented to the reviewer
    pub request_id: String,
    /// The staged proposal
    pub proposal: ModificationProposal,
    /// Resolution state
    pub status: ApprovalStatus,
    /// When the request was staged (RFC 3339)
    pub requested_at: String,
    /// When the request was resolved (RFC 3339)
    pub resolved_at: Option<String>,
}

impl ApprovalRequest {
    pub fn new(proposal: ModificationProposal, requested_at: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            proposal,
            status: ApprovalStatus::Pending,
            requested_at: requested_at.into(),
            resolved_at: None,
        }
    }
}
