//! Autonomous plan lifecycle: merges of duplicate plans, approval-gated
//! deletions, externally resolved approvals, and whole-run rollback.

use std::sync::Arc;

use plan_consensus::engine::approval::ApprovalGate;
use plan_consensus::engine::editor::ApplyContext;
use plan_consensus::{
    default_phase_graph, Analyzer, ApprovalDecision, ApprovalStatus, Document,
    ModificationProposal, PlanDraft, PlanPriority, PlanStatus, ProposalAction, RunStatus,
};

use crate::common::{orchestrator, orchestrator_with_db, test_config, ScriptedAnalyzer};

/// Seed one plan through the editor with an auto-approvable ADD.
async fn seed_plan(
    engine: &Arc<plan_consensus::Orchestrator>,
    title: &str,
    body: &str,
    priority: PlanPriority,
) -> String {
    let proposal = ModificationProposal::new(
        ProposalAction::Add {
            draft: PlanDraft::new(title, body).with_priority(priority),
        },
        1.0,
        "seed",
    );
    let ctx = ApplyContext::new("seed-run", None);
    let outcome = engine.editor().apply(&proposal, &ctx).await.unwrap();
    assert!(outcome.applied);
    outcome.plan_id.unwrap()
}

fn on_topic_analyzers() -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(
            ScriptedAnalyzer::new("a1")
                .with_output("doc-1", &[("r1", "wrap outbound calls in retries")]),
        ),
        Arc::new(
            ScriptedAnalyzer::new("a2")
                .with_output("doc-1", &[("r2", "wrap outbound calls in retries")]),
        ),
    ]
}

/// Two near-duplicate Active plans are detected and merged autonomously:
/// the merge confidence equals their similarity, which clears the gate.
#[tokio::test(flavor = "multi_thread")]
async fn test_near_duplicate_plans_merge_autonomously() {
    let engine = orchestrator(test_config());

    let id_a = seed_plan(
        &engine,
        "Add retry logic",
        "wrap outbound calls in retries",
        PlanPriority::Medium,
    )
    .await;
    let id_b = seed_plan(
        &engine,
        "Add retry logic",
        "wrap outbound calls in retries now",
        PlanPriority::Medium,
    )
    .await;

    let docs = vec![Document::new("doc-1", "reliability")];
    let result = engine
        .clone()
        .run_once(
            "run-merge",
            default_phase_graph(&docs),
            on_topic_analyzers(),
            docs,
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.proposals_applied >= 1);

    let repo = engine.editor().repository();
    for id in [&id_a, &id_b] {
        let input = repo.get_plan(id).unwrap().unwrap();
        assert_eq!(input.status, PlanStatus::Merged);
        assert_eq!(input.version, 2);
    }

    let active = repo.list_active().unwrap();
    assert_eq!(active.len(), 1, "one merged aggregate should remain active");
    assert!(active[0].body.contains("retries"));
}

/// A low-priority plan nothing references is proposed for deletion, but the
/// deletion only lands after explicit approval; its confidence cap keeps it
/// from ever auto-applying.
#[tokio::test(flavor = "multi_thread")]
async fn test_obsolete_plan_deleted_only_after_approval() {
    let mut config = test_config();
    config.approval_timeout_secs = 10;
    let engine = orchestrator(config);

    let stale_id = seed_plan(
        &engine,
        "Tidy build scripts",
        "clean up legacy build scripts",
        PlanPriority::Low,
    )
    .await;

    let gate = engine.approval_gate();
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    gate.set_prompt_tx(tx).await;
    let reviewer_gate = gate.clone();
    tokio::spawn(async move {
        while let Some(prompt) = rx.recv().await {
            reviewer_gate
                .resolve(&prompt.request_id, ApprovalDecision::Approve)
                .await;
        }
    });

    let docs = vec![Document::new("doc-1", "reliability")];
    let result = engine
        .clone()
        .run_once(
            "run-obsolete",
            default_phase_graph(&docs),
            on_topic_analyzers(),
            docs,
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);

    let plan = engine
        .editor()
        .repository()
        .get_plan(&stale_id)
        .unwrap()
        .unwrap();
    assert_eq!(plan.status, PlanStatus::Deleted);
    assert_eq!(plan.version, 2);

    // The deletion went through the gate, never the fast path
    let resolved = gate.resolved_requests().await;
    let delete = resolved
        .iter()
        .find(|r| r.proposal.action.is_delete())
        .expect("delete request must have been staged");
    assert_eq!(delete.status, ApprovalStatus::Approved);
    assert!(delete.proposal.confidence <= 0.6);
}

/// A timed-out deletion request is treated as a rejection: the plan stays.
#[tokio::test(flavor = "multi_thread")]
async fn test_obsolete_plan_survives_timeout() {
    let engine = orchestrator(test_config());

    let stale_id = seed_plan(
        &engine,
        "Tidy build scripts",
        "clean up legacy build scripts",
        PlanPriority::Low,
    )
    .await;

    let docs = vec![Document::new("doc-1", "reliability")];
    let result = engine
        .clone()
        .run_once(
            "run-timeout",
            default_phase_graph(&docs),
            on_topic_analyzers(),
            docs,
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    let plan = engine
        .editor()
        .repository()
        .get_plan(&stale_id)
        .unwrap()
        .unwrap();
    assert_eq!(plan.status, PlanStatus::Active);
    assert_eq!(plan.version, 1);
}

/// An approval can be resolved from outside the process through the
/// persisted request row, the path the `approve <request_id>` command uses.
#[tokio::test(flavor = "multi_thread")]
async fn test_external_approval_via_persisted_request() {
    let mut config = test_config();
    config.approval_timeout_secs = 10;
    let (engine, db) = orchestrator_with_db(config);

    let stale_id = seed_plan(
        &engine,
        "Tidy build scripts",
        "clean up legacy build scripts",
        PlanPriority::Low,
    )
    .await;

    // External reviewer: watch for the prompt, then update the database row
    // as a separate process would.
    let gate = engine.approval_gate();
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    gate.set_prompt_tx(tx).await;
    let pool = db.pool();
    tokio::spawn(async move {
        while let Some(prompt) = rx.recv().await {
            ApprovalGate::resolve_persisted(&pool, &prompt.request_id, ApprovalDecision::Approve)
                .unwrap();
        }
    });

    let docs = vec![Document::new("doc-1", "reliability")];
    let result = engine
        .clone()
        .run_once(
            "run-external",
            default_phase_graph(&docs),
            on_topic_analyzers(),
            docs,
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    let plan = engine
        .editor()
        .repository()
        .get_plan(&stale_id)
        .unwrap()
        .unwrap();
    assert_eq!(plan.status, PlanStatus::Deleted);

    // Resolving the same request again fails: it is no longer pending
    let resolved = gate.resolved_requests().await;
    let request_id = &resolved[0].request_id;
    assert!(
        ApprovalGate::resolve_persisted(&db.pool(), request_id, ApprovalDecision::Reject).is_err()
    );
}

/// Rolling back a run restores the repository byte-for-byte, version
/// counters included, and consumes the run's journal.
#[tokio::test(flavor = "multi_thread")]
async fn test_run_rollback_restores_repository_exactly() {
    let engine = orchestrator(test_config());

    seed_plan(
        &engine,
        "Keeper",
        "a plan from an earlier run",
        PlanPriority::Medium,
    )
    .await;
    let repo = engine.editor().repository().clone();
    let snapshot_before = repo.list_plans().unwrap();

    let docs = vec![Document::new("doc-1", "reliability")];
    let result = engine
        .clone()
        .run_once(
            "run-rollback",
            default_phase_graph(&docs),
            on_topic_analyzers(),
            docs,
        )
        .await
        .unwrap();
    assert_eq!(result.proposals_applied, 1);
    assert_eq!(repo.list_plans().unwrap().len(), 2);

    let rolled = engine.editor().rollback_run("run-rollback").await.unwrap();
    assert_eq!(rolled, 1);
    assert_eq!(repo.list_plans().unwrap(), snapshot_before);

    // Second rollback finds nothing to do
    assert_eq!(engine.editor().rollback_run("run-rollback").await.unwrap(), 0);
}
