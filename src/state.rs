//! Engine State
//!
//! Run-wide counters owned by the orchestrator and passed by handle to every
//! component. No package-level singletons; everything hangs off this struct.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Shared mutable counters for one engine instance.
#[derive(Debug, Default)]
pub struct EngineState {
    /// Analyzer invocations that actually ran (cache misses)
    pub analyzer_invocations: AtomicU64,
    /// Analyzer attempts beyond the first, across all invocations
    pub analyzer_retries: AtomicU64,
    /// Cache lookups that returned a fresh entry
    pub cache_hits: AtomicU64,
    /// Cache lookups that missed or were expired
    pub cache_misses: AtomicU64,
    /// Proposals emitted by the detector, by kind
    pub proposals_add: AtomicU64,
    pub proposals_modify: AtomicU64,
    pub proposals_delete: AtomicU64,
    pub proposals_merge: AtomicU64,
    /// Proposals applied to the plan repository
    pub proposals_applied: AtomicU64,
    /// Proposals staged for human approval
    pub proposals_staged: AtomicU64,
}

/// Serializable snapshot of [`EngineState`] for reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostSummary {
    pub analyzer_invocations: u64,
    pub analyzer_retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub proposals_add: u64,
    pub proposals_modify: u64,
    pub proposals_delete: u64,
    pub proposals_merge: u64,
    pub proposals_applied: u64,
    pub proposals_staged: u64,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one emitted proposal by its kind label.
    pub fn record_proposal(&self, label: &str) {
        match label {
            "add" => self.proposals_add.fetch_add(1, Ordering::Relaxed),
            "modify" => self.proposals_modify.fetch_add(1, Ordering::Relaxed),
            "delete" => self.proposals_delete.fetch_add(1, Ordering::Relaxed),
            "merge" => self.proposals_merge.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> CostSummary {
        CostSummary {
            analyzer_invocations: self.analyzer_invocations.load(Ordering::Relaxed),
            analyzer_retries: self.analyzer_retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            proposals_add: self.proposals_add.load(Ordering::Relaxed),
            proposals_modify: self.proposals_modify.load(Ordering::Relaxed),
            proposals_delete: self.proposals_delete.load(Ordering::Relaxed),
            proposals_merge: self.proposals_merge.load(Ordering::Relaxed),
            proposals_applied: self.proposals_applied.load(Ordering::Relaxed),
            proposals_staged: self.proposals_staged.load(Ordering::Relaxed),
        }
    }
}
