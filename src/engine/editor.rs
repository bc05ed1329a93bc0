//! Plan Lifecycle Editor
//!
//! The only component that mutates the plan repository. Applies ADD /
//! MODIFY / DELETE / MERGE proposals with exhaustive matching, gates them by
//! confidence, journals every mutation with reversible snapshots, and
//! rolls back exactly on mid-apply failure.
//!
//! Hard policy: DELETE proposals are never auto-applied regardless of
//! confidence; they always route through the approval gate.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::approval::ApprovalGate;
use crate::models::plan::{Plan, PlanStatus};
use crate::models::proposal::{ModificationProposal, ProposalAction};
use crate::state::EngineState;
use crate::storage::plan_repository::{JournalEntry, PlanRepository};
use crate::utils::error::{EngineError, EngineResult};

/// Attribution and gating context for one `apply` call.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    /// Run the mutation belongs to
    pub run_id: String,
    /// Phase the mutation is attributed to, if any
    pub phase_id: Option<String>,
    /// Set only by the approval gate after an explicit approval; bypasses
    /// the confidence check for this single proposal.
    pub approved_override: bool,
}

impl ApplyContext {
    pub fn new(run_id: impl Into<String>, phase_id: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase_id,
            approved_override: false,
        }
    }

    /// Same context with the approval override set.
    pub fn with_override(&self) -> Self {
        Self {
            approved_override: true,
            ..self.clone()
        }
    }
}

/// Result of one `apply` call.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Whether the repository was (or already was) in the proposed state
    pub applied: bool,
    /// Primary plan affected (the new plan for ADD/MERGE)
    pub plan_id: Option<String>,
    /// Request id when the proposal was staged for approval instead
    pub staged_request_id: Option<String>,
    /// The proposal's effect was already present; nothing was written
    pub no_op: bool,
    /// Local rejection reason for invalid proposals
    pub error: Option<String>,
}

impl ApplyOutcome {
    fn applied(plan_id: impl Into<String>) -> Self {
        Self {
            applied: true,
            plan_id: Some(plan_id.into()),
            ..Default::default()
        }
    }

    fn no_op(plan_id: Option<String>) -> Self {
        Self {
            applied: true,
            no_op: true,
            plan_id,
            ..Default::default()
        }
    }

    fn staged(request_id: String) -> Self {
        Self {
            staged_request_id: Some(request_id),
            ..Default::default()
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// The states one proposal application can leave the repository in.
struct Mutation {
    prior: Vec<Plan>,
    new: Vec<Plan>,
    primary_plan_id: String,
}

/// Confidence-gated, journaling editor over the plan repository.
pub struct PlanEditor {
    repo: PlanRepository,
    gate: Arc<ApprovalGate>,
    state: Arc<EngineState>,
    auto_approve_threshold: f64,
    /// Exclusive lock for the duration of one apply call, so concurrent
    /// mutations cannot interleave and corrupt a plan's version counter.
    /// Scope is a single proposal, never a whole batch.
    apply_lock: Mutex<()>,
}

impl PlanEditor {
    pub fn new(
        repo: PlanRepository,
        gate: Arc<ApprovalGate>,
        state: Arc<EngineState>,
        auto_approve_threshold: f64,
    ) -> Self {
        Self {
            repo,
            gate,
            state,
            auto_approve_threshold,
            apply_lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &PlanRepository {
        &self.repo
    }

    /// Apply one proposal.
    ///
    /// High-confidence proposals (and gate-approved resubmissions) mutate
    /// the repository immediately; everything else is staged into the
    /// approval gate with `applied == false`. Invalid proposals are
    /// rejected locally in the outcome's `error` and never abort the run.
    /// A storage failure mid-apply rolls the repository back to its exact
    /// prior state and surfaces as `Err`.
    pub async fn apply(
        &self,
        proposal: &ModificationProposal,
        ctx: &ApplyContext,
    ) -> EngineResult<ApplyOutcome> {
        let needs_approval = !ctx.approved_override
            && (proposal.action.is_delete()
                || proposal.confidence < self.auto_approve_threshold);

        if needs_approval {
            let request_id = self.gate.stage(proposal.clone()).await?;
            self.state.proposals_staged.fetch_add(1, Ordering::Relaxed);
            return Ok(ApplyOutcome::staged(request_id));
        }

        let _guard = self.apply_lock.lock().await;

        let outcome = match self.execute(proposal) {
            Ok(Some(mutation)) => {
                let entry = JournalEntry::new(
                    ctx.run_id.clone(),
                    ctx.phase_id.clone(),
                    proposal.clone(),
                    mutation.prior.clone(),
                    mutation.new.clone(),
                );

                if let Err(journal_err) = self.repo.append_journal(&entry) {
                    // Journaling failed: undo the plan writes so the
                    // repository is exactly as before the attempt.
                    self.undo_unjournaled(&mutation);
                    return Err(journal_err);
                }

                info!(
                    proposal = %proposal.summary(),
                    journal = %entry.change_summary(),
                    "proposal applied"
                );
                self.state.proposals_applied.fetch_add(1, Ordering::Relaxed);
                ApplyOutcome::applied(mutation.primary_plan_id)
            }
            Ok(None) => {
                // Idempotent re-apply: the effect is already present
                self.state.proposals_applied.fetch_add(1, Ordering::Relaxed);
                ApplyOutcome::no_op(self.no_op_plan_id(proposal)?)
            }
            Err(EngineError::InvalidProposal(reason)) => {
                warn!(proposal = %proposal.summary(), reason = %reason, "invalid proposal rejected");
                ApplyOutcome::invalid(reason)
            }
            Err(e) => return Err(e),
        };

        Ok(outcome)
    }

    /// Execute the proposal against the repository.
    ///
    /// Returns `Ok(Some(mutation))` when plans were written, `Ok(None)` for
    /// an idempotent no-op, `InvalidProposal` for a proposal rejected
    /// locally, and any other error for storage failures (rolled back via
    /// undo before surfacing).
    fn execute(&self, proposal: &ModificationProposal) -> EngineResult<Option<Mutation>> {
        let now = chrono::Utc::now().to_rfc3339();

        match &proposal.action {
            ProposalAction::Add { draft } => {
                if self
                    .repo
                    .find_active_by_content(&draft.title, &draft.body)?
                    .is_some()
                {
                    return Ok(None);
                }

                let plan = draft
                    .clone()
                    .into_plan(Uuid::new_v4().to_string(), now);
                self.repo.insert_plan(&plan)?;
                Ok(Some(Mutation {
                    prior: vec![],
                    primary_plan_id: plan.plan_id.clone(),
                    new: vec![plan],
                }))
            }

            ProposalAction::Modify { plan_id, patch } => {
                let Some(prior) = self.repo.get_plan(plan_id)? else {
                    return Err(EngineError::invalid_proposal(format!(
                        "modify names unknown plan {}",
                        plan_id
                    )));
                };
                if prior.status != PlanStatus::Active {
                    return Err(EngineError::invalid_proposal(format!(
                        "modify targets {} plan {}",
                        prior.status, plan_id
                    )));
                }
                if patch.is_noop_for(&prior) {
                    return Ok(None);
                }

                let mut updated = prior.clone();
                patch.apply_to(&mut updated);
                updated.version += 1;
                updated.updated_at = now;
                self.repo.update_plan(&updated)?;
                Ok(Some(Mutation {
                    prior: vec![prior],
                    primary_plan_id: updated.plan_id.clone(),
                    new: vec![updated],
                }))
            }

            ProposalAction::Delete { plan_id, .. } => {
                let Some(prior) = self.repo.get_plan(plan_id)? else {
                    return Err(EngineError::invalid_proposal(format!(
                        "delete names unknown plan {}",
                        plan_id
                    )));
                };
                if prior.status == PlanStatus::Deleted {
                    return Ok(None);
                }

                let mut deleted = prior.clone();
                deleted.status = PlanStatus::Deleted;
                deleted.version += 1;
                deleted.updated_at = now;
                self.repo.update_plan(&deleted)?;
                Ok(Some(Mutation {
                    prior: vec![prior],
                    primary_plan_id: deleted.plan_id.clone(),
                    new: vec![deleted],
                }))
            }

            ProposalAction::Merge { plan_ids, target } => {
                let mut distinct = plan_ids.clone();
                distinct.sort();
                distinct.dedup();
                if distinct.len() < 2 {
                    return Err(EngineError::invalid_proposal(
                        "merge requires at least two distinct plan ids",
                    ));
                }

                let mut inputs = Vec::with_capacity(distinct.len());
                for id in &distinct {
                    match self.repo.get_plan(id)? {
                        Some(plan) => inputs.push(plan),
                        None => {
                            return Err(EngineError::invalid_proposal(format!(
                                "merge names unknown plan {}",
                                id
                            )))
                        }
                    }
                }

                if inputs.iter().all(|p| p.status == PlanStatus::Merged) {
                    return Ok(None);
                }
                if let Some(bad) = inputs.iter().find(|p| p.status != PlanStatus::Active) {
                    return Err(EngineError::invalid_proposal(format!(
                        "merge input {} is {}",
                        bad.plan_id, bad.status
                    )));
                }

                // The aggregate inherits every input's source recommendations
                let mut draft = target.clone();
                draft.source_recommendation_ids.extend(
                    inputs
                        .iter()
                        .flat_map(|p| p.source_recommendation_ids.iter().cloned()),
                );

                let merged_plan = draft.into_plan(Uuid::new_v4().to_string(), now.clone());
                self.repo.insert_plan(&merged_plan)?;

                let mut new_state = vec![merged_plan.clone()];
                let mut written = Vec::new();
                for input in &inputs {
                    let mut retired = input.clone();
                    retired.status = PlanStatus::Merged;
                    retired.version += 1;
                    retired.updated_at = now.clone();
                    if let Err(e) = self.repo.update_plan(&retired) {
                        // Mid-apply storage failure: restore what this call
                        // already wrote, then surface the error.
                        let _ = self.repo.remove_plan(&merged_plan.plan_id);
                        for plan in &written {
                            let _ = self.repo.restore_snapshot(plan);
                        }
                        return Err(e);
                    }
                    written.push(input.clone());
                    new_state.push(retired);
                }

                Ok(Some(Mutation {
                    prior: inputs,
                    primary_plan_id: merged_plan.plan_id.clone(),
                    new: new_state,
                }))
            }
        }
    }

    /// Undo a mutation whose journal append failed.
    fn undo_unjournaled(&self, mutation: &Mutation) {
        for plan in &mutation.new {
            let had_prior = mutation.prior.iter().any(|p| p.plan_id == plan.plan_id);
            if !had_prior {
                let _ = self.repo.remove_plan(&plan.plan_id);
            }
        }
        for plan in &mutation.prior {
            let _ = self.repo.restore_snapshot(plan);
        }
    }

    /// Plan id to report for an idempotent no-op, where one exists.
    fn no_op_plan_id(&self, proposal: &ModificationProposal) -> EngineResult<Option<String>> {
        Ok(match &proposal.action {
            ProposalAction::Add { draft } => self
                .repo
                .find_active_by_content(&draft.title, &draft.body)?
                .map(|p| p.plan_id),
            ProposalAction::Modify { plan_id, .. } | ProposalAction::Delete { plan_id, .. } => {
                Some(plan_id.clone())
            }
            ProposalAction::Merge { .. } => None,
        })
    }

    /// Reverse one applied proposal using its journaled prior state. The
    /// repository ends byte-for-byte identical to its pre-apply snapshot.
    pub async fn rollback_entry(&self, entry: &JournalEntry) -> EngineResult<()> {
        let _guard = self.apply_lock.lock().await;
        self.repo.rollback_entry(entry)?;
        self.repo.remove_journal_entry(&entry.id)?;
        info!(entry = %entry.id, "journal entry rolled back");
        Ok(())
    }

    /// Reverse every mutation of one run, newest first.
    /// Returns how many entries were rolled back.
    pub async fn rollback_run(&self, run_id: &str) -> EngineResult<usize> {
        let _guard = self.apply_lock.lock().await;
        let entries = self.repo.journal_for_run(run_id)?;
        let count = entries.len();
        for entry in entries.iter().rev() {
            self.repo.rollback_entry(entry)?;
            self.repo.remove_journal_entry(&entry.id)?;
        }
        if count > 0 {
            info!(run_id, entries = count, "run rolled back");
        }
        Ok(count)
    }
}
