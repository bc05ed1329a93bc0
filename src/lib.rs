//! Plan Consensus Engine
//!
//! Turns disagreeing outputs from multiple independent analyzers into a
//! single deduplicated consensus set, reconciles that consensus against a
//! durable repository of plan records, and autonomously decides whether to
//! create, update, retire, or merge plans. Mutations are gated by a
//! confidence threshold and, below it, by human approval.
//!
//! The execution substrate is a phase-dependency state machine with
//! cascading invalidation plus a checkpoint/cache layer that makes long
//! batch runs resumable and idempotent.

pub mod config;
pub mod engine;
pub mod models;
pub mod report;
pub mod state;
pub mod storage;
pub mod utils;

// Re-export commonly used items
pub use config::{EngineConfig, RetryPolicy};
pub use engine::{
    default_phase_graph, Analyzer, ApprovalDecision, ApprovalGate, ApprovalPrompt,
    ConsensusBuilder, Detector, Orchestrator, PhaseStateMachine, PlanEditor,
};
pub use models::{
    ApprovalRequest, ApprovalStatus, ConsensusRecommendation, Document, ModificationProposal,
    PhaseKind, PhaseRecord, PhaseSpec, PhaseStatus, Plan, PlanDraft, PlanPatch, PlanPriority,
    PlanStatus, ProposalAction, Recommendation, RunResult, RunStatus,
};
pub use report::PhaseReport;
pub use state::{CostSummary, EngineState};
pub use storage::{AnalyzerCache, CheckpointStore, Database, PlanRepository};
pub use utils::error::{EngineError, EngineResult};
