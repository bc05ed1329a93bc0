//! Orchestrator
//!
//! Drives phases in dependency order with bounded parallelism, wiring the
//! analyze -> consensus -> detect -> reconcile -> report pipeline, saving a
//! checkpoint after each completed phase, resuming from checkpoints at
//! startup, and cascading rerun flags when the editor mutates plans.
//!
//! Cancellation is honored between phases, never mid-mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use plan_consensus_similarity::build_scorer;

use crate::config::EngineConfig;
use crate::engine::analyzer::{analyze_with_cache, Analyzer};
use crate::engine::approval::ApprovalGate;
use crate::engine::consensus::ConsensusBuilder;
use crate::engine::detector::Detector;
use crate::engine::editor::{ApplyContext, PlanEditor};
use crate::engine::phase::PhaseStateMachine;
use crate::models::phase::{PhaseKind, PhaseSpec, PhaseStatus};
use crate::models::recommendation::{ConsensusRecommendation, Document, Recommendation};
use crate::models::run::{RunResult, RunStatus};
use crate::report::PhaseReport;
use crate::state::EngineState;
use crate::storage::cache::AnalyzerCache;
use crate::storage::checkpoint::{CheckpointStore, PhaseCheckpoint};
use crate::storage::database::Database;
use crate::storage::plan_repository::PlanRepository;
use crate::utils::error::{EngineError, EngineResult};

/// Build the standard phase graph for a document set: one analyze phase per
/// document in parallel, then consensus -> detect -> reconcile -> report.
pub fn default_phase_graph(documents: &[Document]) -> Vec<PhaseSpec> {
    let mut specs = Vec::new();
    let mut analyze_ids = Vec::new();

    for doc in documents {
        let phase_id = format!("analyze:{}", doc.document_id);
        analyze_ids.push(phase_id.clone());
        specs.push(PhaseSpec::new(
            phase_id,
            PhaseKind::Analyze {
                document_id: doc.document_id.clone(),
            },
        ));
    }

    specs.push(
        PhaseSpec::new("consensus", PhaseKind::Consensus).with_prerequisites(analyze_ids),
    );
    specs.push(
        PhaseSpec::new("detect", PhaseKind::Detect)
            .with_prerequisites(vec!["consensus".to_string()]),
    );
    specs.push(
        PhaseSpec::new("reconcile", PhaseKind::Reconcile)
            .with_prerequisites(vec!["detect".to_string()]),
    );
    specs.push(
        PhaseSpec::new("report", PhaseKind::Report)
            .with_prerequisites(vec!["reconcile".to_string()]),
    );
    specs
}

/// Artifacts flowing between phases within one run.
#[derive(Default)]
struct RunArtifacts {
    /// Per-document analyzer outputs (one inner list per analyzer that
    /// succeeded)
    analyzer_outputs: HashMap<String, Vec<Vec<Recommendation>>>,
    /// The consensus list across all documents
    consensus: Vec<ConsensusRecommendation>,
    /// Proposals emitted by the detector
    proposals: Vec<crate::models::proposal::ModificationProposal>,
}

/// Shared context for the phase tasks of one run.
struct RunContext {
    run_id: String,
    documents: HashMap<String, Document>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    artifacts: Mutex<RunArtifacts>,
    errors: Mutex<Vec<crate::models::run::RunError>>,
}

/// What one executed phase reports back to the run loop.
struct PhaseOutcome {
    /// Durable progress for the phase checkpoint
    progress: Value,
    /// Whether the phase applied plan mutations (triggers the cascade)
    caused_mutation: bool,
    /// Proposals applied during this phase
    proposals_applied: usize,
}

/// The engine orchestrator: owns the stores, the editor, the approval gate,
/// and the run loop.
pub struct Orchestrator {
    config: EngineConfig,
    db: Database,
    cache: AnalyzerCache,
    checkpoints: CheckpointStore,
    editor: Arc<PlanEditor>,
    gate: Arc<ApprovalGate>,
    state: Arc<EngineState>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Wire an orchestrator over one database.
    pub fn new(config: EngineConfig, db: Database) -> EngineResult<Self> {
        config.validate()?;

        let pool = db.pool();
        let cache = AnalyzerCache::new(pool.clone());
        let checkpoints = CheckpointStore::new(pool.clone());
        let gate = Arc::new(
            ApprovalGate::new(Duration::from_secs(config.approval_timeout_secs))
                .with_persistence(pool.clone()),
        );
        let state = Arc::new(EngineState::new());
        let editor = Arc::new(PlanEditor::new(
            PlanRepository::new(pool),
            gate.clone(),
            state.clone(),
            config.auto_approve_threshold,
        ));

        Ok(Self {
            config,
            db,
            cache,
            checkpoints,
            editor,
            gate,
            state,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that aborts the run between phases when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The approval gate, for connecting a reviewer surface.
    pub fn approval_gate(&self) -> Arc<ApprovalGate> {
        self.gate.clone()
    }

    /// The lifecycle editor (and through it the plan repository).
    pub fn editor(&self) -> Arc<PlanEditor> {
        self.editor.clone()
    }

    /// Run-wide counters.
    pub fn state(&self) -> Arc<EngineState> {
        self.state.clone()
    }

    /// Execute one run over the given phase graph, analyzers, and documents.
    ///
    /// Phases already checkpointed as Completed for this `run_id` are
    /// adopted instead of re-executed, making interrupted batches resumable.
    pub async fn run_once(
        self: Arc<Self>,
        run_id: &str,
        phase_specs: Vec<PhaseSpec>,
        analyzers: Vec<Arc<dyn Analyzer>>,
        documents: Vec<Document>,
    ) -> EngineResult<RunResult> {
        let mut machine = PhaseStateMachine::new(phase_specs)?;
        self.db.register_run(run_id)?;

        let ctx = Arc::new(RunContext {
            run_id: run_id.to_string(),
            documents: documents
                .into_iter()
                .map(|d| (d.document_id.clone(), d))
                .collect(),
            analyzers,
            artifacts: Mutex::new(RunArtifacts::default()),
            errors: Mutex::new(Vec::new()),
        });

        let mut result = RunResult::new(run_id);
        self.resume_from_checkpoints(run_id, &mut machine, &ctx, &mut result)
            .await?;

        let max_passes = machine.records().len() * 4 + 8;
        let mut passes = 0;
        let mut fatal = false;

        while machine.has_unfinished_work() {
            if self.cancel.is_cancelled() {
                warn!(run_id, "cancellation observed between phases");
                result.status = RunStatus::Cancelled;
                result.push_error(
                    None,
                    EngineError::Cancelled("run aborted between phases".to_string()),
                );
                break;
            }
            passes += 1;
            if passes > max_passes {
                result.push_error(None, "phase graph failed to settle; aborting run");
                break;
            }

            let mut ready = machine.ready_phases();
            // Configured skips observed at run time (e.g., after a cascade
            // flagged a skipped phase for rerun)
            ready.retain(|id| {
                let skip = machine.spec(id).map(|s| s.skip).unwrap_or(false);
                if skip {
                    let _ = machine.mark_skipped(id);
                }
                !skip
            });
            if ready.is_empty() {
                break;
            }

            for chunk in ready.chunks(self.config.max_parallel_phases) {
                if self.cancel.is_cancelled() {
                    break;
                }

                let mut join_set: JoinSet<(String, Result<PhaseOutcome, EngineError>, u64)> =
                    JoinSet::new();

                for phase_id in chunk {
                    if let Err(e) = machine.mark_in_progress(phase_id) {
                        if e.is_fatal() {
                            error!(phase = %phase_id, error = %e, "prerequisite violation");
                            result.push_error(Some(phase_id.clone()), e.to_string());
                            fatal = true;
                            break;
                        }
                        result.push_error(Some(phase_id.clone()), e.to_string());
                        continue;
                    }

                    let Some(kind) = machine.spec(phase_id).map(|s| s.kind.clone()) else {
                        continue;
                    };
                    let orchestrator = self.clone();
                    let ctx = ctx.clone();
                    let phase_id = phase_id.clone();

                    join_set.spawn(async move {
                        let started = Instant::now();
                        let outcome = orchestrator.execute_phase(&ctx, &phase_id, kind).await;
                        (phase_id, outcome, started.elapsed().as_millis() as u64)
                    });
                }

                while let Some(joined) = join_set.join_next().await {
                    let (phase_id, outcome, duration_ms) = match joined {
                        Ok(v) => v,
                        Err(e) => {
                            result.push_error(None, format!("phase task panicked: {}", e));
                            continue;
                        }
                    };

                    match outcome {
                        Ok(outcome) => {
                            machine.mark_completed(&phase_id, duration_ms)?;
                            result.proposals_applied += outcome.proposals_applied;

                            self.checkpoints
                                .save(PhaseCheckpoint::new(
                                    run_id,
                                    phase_id.clone(),
                                    PhaseStatus::Completed,
                                    outcome.progress,
                                ))
                                .await?;

                            if outcome.caused_mutation {
                                machine.cascade_rerun(&phase_id);
                            }
                        }
                        Err(e) => {
                            machine.mark_failed(&phase_id, duration_ms)?;
                            result.push_error(Some(phase_id.clone()), e.to_string());
                            if e.is_fatal() {
                                fatal = true;
                            }
                        }
                    }
                }

                if fatal {
                    break;
                }
            }

            if fatal {
                break;
            }
        }

        // Fold in the non-fatal errors phases collected along the way
        result.errors.extend(ctx.errors.lock().await.drain(..));
        result.phases_completed = machine.completed_count();
        result.proposals_pending_approval = self.gate.pending_count().await;

        if result.status != RunStatus::Cancelled {
            let any_failed = machine
                .records()
                .iter()
                .any(|r| r.status == PhaseStatus::Failed);
            result.status = if fatal || any_failed {
                RunStatus::Failed
            } else {
                RunStatus::Completed
            };
        }

        // End-of-run maintenance: drop cache entries past their ttl
        match self.cache.prune_expired() {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned expired analyzer cache entries"),
            Err(e) => warn!(error = %e, "cache prune failed"),
        }

        // The status report is regenerated at the end of every run
        let report = PhaseReport::new(run_id, machine.records(), self.state.snapshot());
        self.db.finish_run(&result, &report.to_json()?)?;
        info!(
            run_id,
            status = %result.status,
            phases = result.phases_completed,
            applied = result.proposals_applied,
            "run finished"
        );

        if fatal {
            return Err(EngineError::prerequisite(format!(
                "run {} aborted on prerequisite violation",
                run_id
            )));
        }
        Ok(result)
    }

    /// Adopt checkpointed completions and replay their saved artifacts.
    async fn resume_from_checkpoints(
        &self,
        run_id: &str,
        machine: &mut PhaseStateMachine,
        ctx: &Arc<RunContext>,
        result: &mut RunResult,
    ) -> EngineResult<()> {
        let checkpoints = self.checkpoints.load_for_run(run_id).await?;
        if checkpoints.is_empty() {
            return Ok(());
        }

        let mut artifacts = ctx.artifacts.lock().await;
        for checkpoint in checkpoints {
            if checkpoint.status != PhaseStatus::Completed {
                continue;
            }
            let Some(spec) = machine.spec(&checkpoint.phase_id).cloned() else {
                continue;
            };
            let record_status = machine
                .record(&checkpoint.phase_id)
                .map(|r| r.status)
                .unwrap_or(PhaseStatus::NotStarted);
            if record_status != PhaseStatus::NotStarted {
                continue;
            }

            machine.mark_resumed_completed(&checkpoint.phase_id)?;
            info!(run_id, phase = %checkpoint.phase_id, "resumed from checkpoint");

            match &spec.kind {
                PhaseKind::Analyze { document_id } => {
                    if let Ok(outputs) =
                        serde_json::from_value::<Vec<Vec<Recommendation>>>(checkpoint.progress)
                    {
                        artifacts.analyzer_outputs.insert(document_id.clone(), outputs);
                    }
                }
                PhaseKind::Consensus => {
                    if let Ok(consensus) = serde_json::from_value::<Vec<ConsensusRecommendation>>(
                        checkpoint.progress,
                    ) {
                        artifacts.consensus = consensus;
                    }
                }
                PhaseKind::Detect => {
                    if let Ok(proposals) = serde_json::from_value::<
                        Vec<crate::models::proposal::ModificationProposal>,
                    >(checkpoint.progress)
                    {
                        artifacts.proposals = proposals;
                    }
                }
                PhaseKind::Reconcile => {
                    if let Some(applied) = checkpoint
                        .progress
                        .get("applied")
                        .and_then(Value::as_u64)
                    {
                        result.proposals_applied += applied as usize;
                    }
                }
                PhaseKind::Report => {}
            }
        }
        Ok(())
    }

    /// Execute one phase's work.
    async fn execute_phase(
        &self,
        ctx: &Arc<RunContext>,
        phase_id: &str,
        kind: PhaseKind,
    ) -> EngineResult<PhaseOutcome> {
        match kind {
            PhaseKind::Analyze { document_id } => self.run_analyze(ctx, phase_id, &document_id).await,
            PhaseKind::Consensus => self.run_consensus(ctx).await,
            PhaseKind::Detect => self.run_detect(ctx).await,
            PhaseKind::Reconcile => self.run_reconcile(ctx, phase_id).await,
            PhaseKind::Report => self.run_report().await,
        }
    }

    /// Invoke every analyzer against one document. Individual analyzer
    /// failures (after retries) are accumulated, not fatal: the phase
    /// completes with whatever outputs succeeded and consensus degrades.
    async fn run_analyze(
        &self,
        ctx: &Arc<RunContext>,
        phase_id: &str,
        document_id: &str,
    ) -> EngineResult<PhaseOutcome> {
        let document = ctx.documents.get(document_id).ok_or_else(|| {
            EngineError::not_found(format!("document not registered: {}", document_id))
        })?;

        let mut outputs: Vec<Vec<Recommendation>> = Vec::new();
        for analyzer in &ctx.analyzers {
            match analyze_with_cache(
                analyzer,
                document,
                &self.cache,
                &self.config.retry,
                self.config.cache_ttl_secs,
                &self.state,
            )
            .await
            {
                Ok(recommendations) => outputs.push(recommendations),
                Err(e) => {
                    warn!(
                        analyzer = analyzer.id(),
                        document = document_id,
                        error = %e,
                        "analyzer failed after retries; document partially analyzed"
                    );
                    ctx.errors.lock().await.push(crate::models::run::RunError::new(
                        Some(phase_id.to_string()),
                        format!("analyzer {} failed: {}", analyzer.id(), e),
                    ));
                }
            }
        }

        let progress = serde_json::to_value(&outputs)?;
        ctx.artifacts
            .lock()
            .await
            .analyzer_outputs
            .insert(document_id.to_string(), outputs);

        Ok(PhaseOutcome {
            progress,
            caused_mutation: false,
            proposals_applied: 0,
        })
    }

    /// Cluster each document's analyzer outputs and assemble the run-wide
    /// consensus list.
    async fn run_consensus(&self, ctx: &Arc<RunContext>) -> EngineResult<PhaseOutcome> {
        let builder = ConsensusBuilder::new(
            build_scorer(self.config.scorer),
            self.config.similarity_threshold,
        );

        let mut artifacts = ctx.artifacts.lock().await;
        let mut consensus = Vec::new();

        let mut doc_ids: Vec<String> = artifacts.analyzer_outputs.keys().cloned().collect();
        doc_ids.sort();
        for doc_id in &doc_ids {
            let outputs = &artifacts.analyzer_outputs[doc_id];
            consensus.extend(builder.build(outputs));
        }

        let progress = serde_json::to_value(&consensus)?;
        artifacts.consensus = consensus;

        Ok(PhaseOutcome {
            progress,
            caused_mutation: false,
            proposals_applied: 0,
        })
    }

    /// Run the three detection scans against the current plan repository.
    async fn run_detect(&self, ctx: &Arc<RunContext>) -> EngineResult<PhaseOutcome> {
        let detector = Detector::new(
            build_scorer(self.config.scorer),
            self.config.coverage_threshold,
            self.config.duplicate_threshold,
            self.config.obsolescence_confidence_cap,
        );

        let plans = self.editor.repository().list_plans()?;
        let mut artifacts = ctx.artifacts.lock().await;
        let proposals = detector.detect(&artifacts.consensus, &plans);

        for proposal in &proposals {
            self.state.record_proposal(proposal.action.label());
        }

        let progress = serde_json::to_value(&proposals)?;
        artifacts.proposals = proposals;

        Ok(PhaseOutcome {
            progress,
            caused_mutation: false,
            proposals_applied: 0,
        })
    }

    /// Apply every detected proposal through the editor, then resolve the
    /// staged ones through the approval gate. This is the only phase that
    /// blocks on a human.
    async fn run_reconcile(
        &self,
        ctx: &Arc<RunContext>,
        phase_id: &str,
    ) -> EngineResult<PhaseOutcome> {
        let proposals = ctx.artifacts.lock().await.proposals.clone();
        let apply_ctx = ApplyContext::new(ctx.run_id.clone(), Some(phase_id.to_string()));

        let mut applied = 0usize;
        let mut staged = 0usize;
        let mut mutations = 0usize;

        for proposal in &proposals {
            match self.editor.apply(proposal, &apply_ctx).await {
                Ok(outcome) if outcome.applied => {
                    applied += 1;
                    if !outcome.no_op {
                        mutations += 1;
                    }
                }
                Ok(outcome) if outcome.staged_request_id.is_some() => staged += 1,
                Ok(outcome) => {
                    if let Some(message) = outcome.error {
                        ctx.errors.lock().await.push(crate::models::run::RunError::new(
                            Some(phase_id.to_string()),
                            message,
                        ));
                    }
                }
                Err(e) => {
                    // Mutation failure: the editor already rolled this
                    // proposal back; record and continue.
                    ctx.errors.lock().await.push(crate::models::run::RunError::new(
                        Some(phase_id.to_string()),
                        e.to_string(),
                    ));
                }
            }
        }

        let gate_outcome = self.gate.process_pending(&self.editor, &apply_ctx).await?;
        applied += gate_outcome.approved_applied;
        mutations += gate_outcome.approved_applied;
        ctx.errors.lock().await.extend(gate_outcome.errors);

        info!(
            applied,
            staged,
            approved = gate_outcome.approved_applied,
            rejected = gate_outcome.rejected,
            timed_out = gate_outcome.timed_out,
            "reconcile finished"
        );

        Ok(PhaseOutcome {
            progress: serde_json::json!({
                "applied": applied,
                "staged": staged,
                "approved": gate_outcome.approved_applied,
                "rejected": gate_outcome.rejected,
                "timed_out": gate_outcome.timed_out,
            }),
            caused_mutation: mutations > 0,
            proposals_applied: applied,
        })
    }

    /// Summarize repository and counter state for the checkpointed report.
    async fn run_report(&self) -> EngineResult<PhaseOutcome> {
        let plans = self.editor.repository().list_plans()?;
        let active = plans.iter().filter(|p| p.status.is_active()).count();

        Ok(PhaseOutcome {
            progress: serde_json::json!({
                "plans_total": plans.len(),
                "plans_active": active,
                "counters": self.state.snapshot(),
            }),
            caused_mutation: false,
            proposals_applied: 0,
        })
    }
}
