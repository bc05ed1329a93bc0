//! Phase Status Report
//!
//! Machine-readable (one record per phase) and human-readable summaries,
//! regenerated at the end of every run and stored with the run row.

use serde::{Deserialize, Serialize};

use crate::models::phase::PhaseRecord;
use crate::state::CostSummary;
use crate::utils::error::EngineResult;

/// End-of-run status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub run_id: String,
    pub generated_at: String,
    pub phases: Vec<PhaseRecord>,
    pub counters: CostSummary,
}

impl PhaseReport {
    pub fn new(run_id: impl Into<String>, phases: Vec<PhaseRecord>, counters: CostSummary) -> Self {
        Self {
            run_id: run_id.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            phases,
            counters,
        }
    }

    /// Machine-readable form.
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable table of phase statuses plus the run counters.
    pub fn human_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Run {}\n", self.run_id));
        out.push_str(&format!(
            "{:<24} {:<12} {:>5} {:>10}\n",
            "phase", "status", "runs", "last (ms)"
        ));
        for phase in &self.phases {
            out.push_str(&format!(
                "{:<24} {:<12} {:>5} {:>10}\n",
                phase.phase_id,
                phase.status.to_string(),
                phase.run_count,
                phase
                    .last_duration_ms
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ));
        }
        out.push_str(&format!(
            "analyzers: {} invoked, {} retries, cache {}/{} hit/miss\n",
            self.counters.analyzer_invocations,
            self.counters.analyzer_retries,
            self.counters.cache_hits,
            self.counters.cache_misses,
        ));
        out.push_str(&format!(
            "proposals: {} add, {} modify, {} delete, {} merge ({} applied, {} staged)\n",
            self.counters.proposals_add,
            self.counters.proposals_modify,
            self.counters.proposals_delete,
            self.counters.proposals_merge,
            self.counters.proposals_applied,
            self.counters.proposals_staged,
        ));
        out
    }
}
