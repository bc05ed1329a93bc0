//! Data models for the engine

pub mod phase;
pub mod plan;
pub mod proposal;
pub mod recommendation;
pub mod run;

pub use phase::{PhaseKind, PhaseRecord, PhaseSpec, PhaseStatus};
pub use plan::{Plan, PlanDraft, PlanPatch, PlanPriority, PlanStatus};
pub use proposal::{ApprovalRequest, ApprovalStatus, ModificationProposal, ProposalAction};
pub use recommendation::{ConsensusRecommendation, Document, Recommendation};
pub use run::{RunError, RunResult, RunStatus};
