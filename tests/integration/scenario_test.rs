//! End-to-end consensus scenario: three analyzers disagree, two cluster,
//! the detector proposes ADDs, and the approval gate resolves them.

use std::sync::Arc;

use plan_consensus::{
    default_phase_graph, Analyzer, ApprovalDecision, Document, PlanStatus, RunStatus,
};

use crate::common::{orchestrator, test_config, ScriptedAnalyzer};

fn documents() -> Vec<Document> {
    vec![Document::new("doc-1", "service reliability review")]
}

/// Two analyzers propose near-identical retry recommendations, a third
/// proposes something unrelated. Expect one two-member cluster and one
/// singleton, both below the auto-approve threshold; approving only the
/// first yields exactly one new plan and an empty error list.
#[tokio::test(flavor = "multi_thread")]
async fn test_three_analyzer_consensus_with_partial_approval() {
    let mut config = test_config();
    config.approval_timeout_secs = 10;
    let engine = orchestrator(config);

    let analyzers: Vec<Arc<dyn Analyzer>> = vec![
        Arc::new(
            ScriptedAnalyzer::new("a1")
                .with_output("doc-1", &[("r1", "Add retry logic to outbound calls")]),
        ),
        Arc::new(
            ScriptedAnalyzer::new("a2")
                .with_output("doc-1", &[("r2", "Add retry logic to outbound calls now")]),
        ),
        Arc::new(
            ScriptedAnalyzer::new("a3").with_output("doc-1", &[("r3", "Use a circuit breaker")]),
        ),
    ];

    // Reviewer: approve the first (highest-confidence) request, reject the rest
    let gate = engine.approval_gate();
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    gate.set_prompt_tx(tx).await;
    let reviewer_gate = gate.clone();
    tokio::spawn(async move {
        let mut first = true;
        while let Some(prompt) = rx.recv().await {
            let decision = if first {
                ApprovalDecision::Approve
            } else {
                ApprovalDecision::Reject
            };
            first = false;
            reviewer_gate.resolve(&prompt.request_id, decision).await;
        }
    });

    let docs = documents();
    let result = engine
        .clone()
        .run_once("run-scenario", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.proposals_applied, 1);
    assert_eq!(result.proposals_pending_approval, 0);
    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.phases_completed, 5);

    // Exactly one plan, built from the approved cluster
    let plans = engine.editor().repository().list_plans().unwrap();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(plan.status, PlanStatus::Active);
    assert_eq!(plan.version, 1);
    assert!(plan.body.contains("retry logic"));
    // The aggregate carries both clustered recommendations
    assert_eq!(plan.source_recommendation_ids, vec!["r1", "r2"]);

    // The two staged requests are both resolved
    let resolved = gate.resolved_requests().await;
    assert_eq!(resolved.len(), 2);
}

/// With every analyzer agreeing, the ADD clears the auto-approve threshold
/// and applies without any reviewer.
#[tokio::test(flavor = "multi_thread")]
async fn test_unanimous_consensus_auto_applies() {
    let engine = orchestrator(test_config());

    let analyzers: Vec<Arc<dyn Analyzer>> = vec![
        Arc::new(ScriptedAnalyzer::new("a1").with_output("doc-1", &[("r1", "Add retry logic")])),
        Arc::new(ScriptedAnalyzer::new("a2").with_output("doc-1", &[("r2", "Add retry logic")])),
        Arc::new(ScriptedAnalyzer::new("a3").with_output("doc-1", &[("r3", "Add retry logic")])),
    ];

    let docs = documents();
    let result = engine
        .clone()
        .run_once("run-unanimous", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.proposals_applied, 1);
    assert!(result.errors.is_empty());

    let plans = engine.editor().repository().list_plans().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(
        plans[0].source_recommendation_ids,
        vec!["r1", "r2", "r3"]
    );
}

/// A single analyzer degrades consensus to pass-through; the recommendation
/// still surfaces as its own cluster.
#[tokio::test(flavor = "multi_thread")]
async fn test_single_analyzer_degrades_to_pass_through() {
    let engine = orchestrator(test_config());

    let analyzers: Vec<Arc<dyn Analyzer>> = vec![Arc::new(
        ScriptedAnalyzer::new("a1").with_output("doc-1", &[("r1", "Add retry logic")]),
    )];

    let docs = documents();
    let result = engine
        .clone()
        .run_once("run-solo", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    // Pass-through still surfaces the recommendation: agreement is 1/1 so
    // the ADD auto-applies. One plan appears.
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(engine.editor().repository().list_plans().unwrap().len(), 1);
    assert_eq!(result.proposals_applied, 1);
}

/// Two analyzers, disjoint recommendations: every cluster is a singleton at
/// agreement 1/2, below the gate, and with no reviewer everything times out.
#[tokio::test(flavor = "multi_thread")]
async fn test_disagreement_without_reviewer_applies_nothing() {
    let engine = orchestrator(test_config());

    let analyzers: Vec<Arc<dyn Analyzer>> = vec![
        Arc::new(ScriptedAnalyzer::new("a1").with_output("doc-1", &[("r1", "Add retry logic")])),
        Arc::new(
            ScriptedAnalyzer::new("a2").with_output("doc-1", &[("r2", "Use a circuit breaker")]),
        ),
    ];

    let docs = documents();
    let result = engine
        .clone()
        .run_once("run-split", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.proposals_applied, 0);
    assert_eq!(result.proposals_pending_approval, 0);
    assert!(engine.editor().repository().list_plans().unwrap().is_empty());

    // Both requests resolved as timed out
    let resolved = engine.approval_gate().resolved_requests().await;
    assert_eq!(resolved.len(), 2);
    assert!(resolved
        .iter()
        .all(|r| r.status == plan_consensus::ApprovalStatus::TimedOut));
}
