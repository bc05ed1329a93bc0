//! Phase State Machine
//!
//! Tracks execution state of named phases, enforces prerequisite
//! satisfaction, and cascades rerun flags to downstream phases when an
//! upstream phase mutates shared artifacts.
//!
//! Transitions: `NotStarted -> InProgress -> {Completed, Failed}`;
//! `Completed -> NeedsRerun` (external trigger); `NeedsRerun -> InProgress`.
//! `Skipped` phases satisfy prerequisites exactly like `Completed`.
//! Starting a phase with an unmet prerequisite is a programming error and
//! fatal for the run.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::models::phase::{PhaseRecord, PhaseSpec, PhaseStatus};
use crate::utils::error::{EngineError, EngineResult};

/// In-memory state machine over a validated phase dependency graph.
pub struct PhaseStateMachine {
    records: BTreeMap<String, PhaseRecord>,
    specs: HashMap<String, PhaseSpec>,
}

impl PhaseStateMachine {
    /// Build the machine from static phase declarations.
    ///
    /// Validates the graph up front: duplicate ids, prerequisites naming
    /// unknown phases, and dependency cycles are all construction errors.
    /// Config-skipped phases start in `Skipped`.
    pub fn new(specs: Vec<PhaseSpec>) -> EngineResult<Self> {
        let mut ids = HashSet::new();
        for spec in &specs {
            if !ids.insert(spec.phase_id.clone()) {
                return Err(EngineError::config(format!(
                    "duplicate phase id: {}",
                    spec.phase_id
                )));
            }
        }

        for spec in &specs {
            for prereq in &spec.prerequisites {
                if !ids.contains(prereq) {
                    return Err(EngineError::config(format!(
                        "phase {} names unknown prerequisite {}",
                        spec.phase_id, prereq
                    )));
                }
            }
        }

        Self::check_acyclic(&specs)?;

        let mut records = BTreeMap::new();
        for spec in &specs {
            let mut record = PhaseRecord::new(spec.phase_id.clone(), spec.prerequisites.clone());
            if spec.skip {
                record.status = PhaseStatus::Skipped;
            }
            records.insert(spec.phase_id.clone(), record);
        }

        // Derive dependents from prerequisites
        for spec in &specs {
            for prereq in &spec.prerequisites {
                if let Some(record) = records.get_mut(prereq) {
                    record.dependents.push(spec.phase_id.clone());
                }
            }
        }
        for record in records.values_mut() {
            record.dependents.sort();
        }

        let specs = specs
            .into_iter()
            .map(|s| (s.phase_id.clone(), s))
            .collect();

        Ok(Self { records, specs })
    }

    /// Kahn's algorithm over the declarations; leftovers mean a cycle.
    fn check_acyclic(specs: &[PhaseSpec]) -> EngineResult<()> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for spec in specs {
            in_degree.entry(spec.phase_id.as_str()).or_insert(0);
            for prereq in &spec.prerequisites {
                *in_degree.entry(spec.phase_id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(prereq.as_str())
                    .or_default()
                    .push(spec.phase_id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(deps) = dependents.get(id) {
                for dep in deps {
                    if let Some(degree) = in_degree.get_mut(dep) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dep);
                        }
                    }
                }
            }
        }

        if visited < specs.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(EngineError::config(format!(
                "phase dependency cycle involving: {}",
                stuck.join(", ")
            )));
        }
        Ok(())
    }

    /// Look up one phase record.
    pub fn record(&self, phase_id: &str) -> Option<&PhaseRecord> {
        self.records.get(phase_id)
    }

    /// Snapshot of every record, ordered by phase id.
    pub fn records(&self) -> Vec<PhaseRecord> {
        self.records.values().cloned().collect()
    }

    /// The static declaration for one phase.
    pub fn spec(&self, phase_id: &str) -> Option<&PhaseSpec> {
        self.specs.get(phase_id)
    }

    fn record_mut(&mut self, phase_id: &str) -> EngineResult<&mut PhaseRecord> {
        self.records
            .get_mut(phase_id)
            .ok_or_else(|| EngineError::not_found(format!("unknown phase: {}", phase_id)))
    }

    /// Whether every prerequisite of a phase is Completed or Skipped.
    pub fn prerequisites_met(&self, phase_id: &str) -> bool {
        match self.records.get(phase_id) {
            Some(record) => record.prerequisites.iter().all(|p| {
                self.records
                    .get(p)
                    .map(|r| r.status.satisfies_prerequisite())
                    .unwrap_or(false)
            }),
            None => false,
        }
    }

    /// Start a phase.
    ///
    /// Starting with an unmet prerequisite is a corrupted-graph programming
    /// error and returns the fatal `PrerequisiteViolation`.
    pub fn mark_in_progress(&mut self, phase_id: &str) -> EngineResult<()> {
        if !self.prerequisites_met(phase_id) {
            let unmet: Vec<String> = self
                .records
                .get(phase_id)
                .map(|r| {
                    r.prerequisites
                        .iter()
                        .filter(|p| {
                            !self
                                .records
                                .get(*p)
                                .map(|r| r.status.satisfies_prerequisite())
                                .unwrap_or(false)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            return Err(EngineError::prerequisite(format!(
                "phase {} started with unmet prerequisites: {}",
                phase_id,
                unmet.join(", ")
            )));
        }

        let record = self.record_mut(phase_id)?;
        if !record.status.is_runnable() {
            return Err(EngineError::transition(format!(
                "phase {} cannot start from {}",
                phase_id, record.status
            )));
        }
        record.status = PhaseStatus::InProgress;
        Ok(())
    }

    /// Finish a phase successfully.
    pub fn mark_completed(&mut self, phase_id: &str, duration_ms: u64) -> EngineResult<()> {
        let record = self.record_mut(phase_id)?;
        if record.status != PhaseStatus::InProgress {
            return Err(EngineError::transition(format!(
                "phase {} cannot complete from {}",
                phase_id, record.status
            )));
        }
        record.status = PhaseStatus::Completed;
        record.run_count += 1;
        record.last_duration_ms = Some(duration_ms);
        Ok(())
    }

    /// Finish a phase with an error.
    pub fn mark_failed(&mut self, phase_id: &str, duration_ms: u64) -> EngineResult<()> {
        let record = self.record_mut(phase_id)?;
        if record.status != PhaseStatus::InProgress {
            return Err(EngineError::transition(format!(
                "phase {} cannot fail from {}",
                phase_id, record.status
            )));
        }
        record.status = PhaseStatus::Failed;
        record.run_count += 1;
        record.last_duration_ms = Some(duration_ms);
        Ok(())
    }

    /// Mark a phase Skipped (configured skip observed at run time).
    pub fn mark_skipped(&mut self, phase_id: &str) -> EngineResult<()> {
        let record = self.record_mut(phase_id)?;
        record.status = PhaseStatus::Skipped;
        Ok(())
    }

    /// Adopt a checkpointed completion without running the phase.
    pub fn mark_resumed_completed(&mut self, phase_id: &str) -> EngineResult<()> {
        let record = self.record_mut(phase_id)?;
        if record.status != PhaseStatus::NotStarted {
            return Err(EngineError::transition(format!(
                "phase {} cannot resume from {}",
                phase_id, record.status
            )));
        }
        record.status = PhaseStatus::Completed;
        Ok(())
    }

    /// Cascade a rerun flag from a mutated phase to every transitive
    /// dependent. Dependents still NotStarted are left alone (they will run
    /// anyway); everything else is flipped to NeedsRerun. Returns the ids
    /// that were marked, in traversal order.
    pub fn cascade_rerun(&mut self, source_id: &str) -> Vec<String> {
        let mut marked = Vec::new();
        let mut queue: VecDeque<String> = self
            .records
            .get(source_id)
            .map(|r| r.dependents.iter().cloned().collect())
            .unwrap_or_default();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(record) = self.records.get_mut(&id) {
                if record.status != PhaseStatus::NotStarted
                    && record.status != PhaseStatus::NeedsRerun
                {
                    record.status = PhaseStatus::NeedsRerun;
                    marked.push(id.clone());
                }
                queue.extend(record.dependents.iter().cloned());
            }
        }

        if !marked.is_empty() {
            debug!(source = source_id, marked = ?marked, "cascaded rerun flags");
        }
        marked
    }

    /// Phases ready to start right now: runnable status and every
    /// prerequisite satisfied. Ordered by phase id.
    pub fn ready_phases(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.status.is_runnable() && self.prerequisites_met(&r.phase_id))
            .map(|r| r.phase_id.clone())
            .collect()
    }

    /// Whether any phase still has work pending or running.
    pub fn has_unfinished_work(&self) -> bool {
        self.records.values().any(|r| {
            r.status.is_runnable() || r.status == PhaseStatus::InProgress
        })
    }

    /// Number of phases currently Completed.
    pub fn completed_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == PhaseStatus::Completed)
            .count()
    }
}
