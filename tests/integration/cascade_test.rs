//! Phase graph execution: dependency ordering, bounded parallelism,
//! configured skips, and cascading rerun flags.

use std::sync::Arc;

use plan_consensus::{
    default_phase_graph, Analyzer, Document, EngineError, PhaseKind, PhaseSpec,
    PhaseStateMachine, PhaseStatus, RunStatus,
};

use crate::common::{orchestrator, test_config, ScriptedAnalyzer};

fn spec(id: &str, prereqs: &[&str]) -> PhaseSpec {
    PhaseSpec::new(id, PhaseKind::Report)
        .with_prerequisites(prereqs.iter().map(|s| s.to_string()).collect())
}

/// Cascade completeness: with dependents P -> {A, B} and B -> {C}, a
/// mutation attributed to P marks A, B, and C all NeedsRerun.
#[test]
fn test_cascade_reaches_transitive_dependents() {
    let mut machine = PhaseStateMachine::new(vec![
        spec("p", &[]),
        spec("a", &["p"]),
        spec("b", &["p"]),
        spec("c", &["b"]),
    ])
    .unwrap();

    for id in ["p", "a", "b", "c"] {
        machine.mark_in_progress(id).unwrap();
        machine.mark_completed(id, 1).unwrap();
    }

    machine.cascade_rerun("p");

    for id in ["a", "b", "c"] {
        assert_eq!(
            machine.record(id).unwrap().status,
            PhaseStatus::NeedsRerun,
            "{} must be flagged",
            id
        );
    }
    assert_eq!(machine.record("p").unwrap().status, PhaseStatus::Completed);

    // Flagged phases become ready again in dependency order and rerun
    assert_eq!(machine.ready_phases(), vec!["a", "b"]);
    machine.mark_in_progress("a").unwrap();
    machine.mark_completed("a", 2).unwrap();
    machine.mark_in_progress("b").unwrap();
    machine.mark_completed("b", 2).unwrap();
    assert_eq!(machine.ready_phases(), vec!["c"]);
    machine.mark_in_progress("c").unwrap();
    machine.mark_completed("c", 2).unwrap();

    for id in ["a", "b", "c"] {
        assert_eq!(machine.record(id).unwrap().run_count, 2);
    }
}

/// Multiple documents analyze in parallel layers and the pipeline still
/// settles in dependency order.
#[tokio::test(flavor = "multi_thread")]
async fn test_multi_document_run_completes_all_phases() {
    let engine = orchestrator(test_config());

    let analyzers: Vec<Arc<dyn Analyzer>> = vec![
        Arc::new(
            ScriptedAnalyzer::new("a1")
                .with_output("doc-1", &[("r1", "Add retry logic")])
                .with_output("doc-2", &[("r4", "Improve error messages")]),
        ),
        Arc::new(
            ScriptedAnalyzer::new("a2")
                .with_output("doc-1", &[("r2", "Add retry logic")])
                .with_output("doc-2", &[("r5", "Improve error messages")]),
        ),
    ];

    let docs = vec![
        Document::new("doc-1", "reliability"),
        Document::new("doc-2", "diagnostics"),
        Document::new("doc-3", "unreviewed"),
    ];
    let result = engine
        .clone()
        .run_once("run-multi", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    // 3 analyze phases + consensus + detect + reconcile + report
    assert_eq!(result.phases_completed, 7);
    // Both unanimous recommendations auto-applied
    assert_eq!(result.proposals_applied, 2);
    assert_eq!(engine.editor().repository().list_plans().unwrap().len(), 2);
}

/// A configured-skip phase satisfies prerequisites without running, so the
/// pipeline completes with nothing detected.
#[tokio::test(flavor = "multi_thread")]
async fn test_skipped_detect_phase_blocks_nothing() {
    let engine = orchestrator(test_config());

    let analyzers: Vec<Arc<dyn Analyzer>> = vec![
        Arc::new(ScriptedAnalyzer::new("a1").with_output("doc-1", &[("r1", "Add retry logic")])),
        Arc::new(ScriptedAnalyzer::new("a2").with_output("doc-1", &[("r2", "Add retry logic")])),
    ];

    let docs = vec![Document::new("doc-1", "reliability")];
    let mut graph = default_phase_graph(&docs);
    for phase in &mut graph {
        if phase.phase_id == "detect" {
            phase.skip = true;
        }
    }

    let result = engine
        .clone()
        .run_once("run-skip", graph, analyzers, docs)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    // detect is Skipped, not Completed
    assert_eq!(result.phases_completed, 4);
    // No detection ran, so nothing was proposed or applied
    assert_eq!(result.proposals_applied, 0);
    assert!(engine.editor().repository().list_plans().unwrap().is_empty());
}

/// A cyclic phase graph is rejected at construction, before anything runs.
#[tokio::test(flavor = "multi_thread")]
async fn test_cyclic_graph_is_a_config_error() {
    let engine = orchestrator(test_config());

    let graph = vec![spec("a", &["b"]), spec("b", &["a"])];
    let result = engine
        .clone()
        .run_once("run-cycle", graph, Vec::new(), Vec::new())
        .await;

    assert!(matches!(result, Err(EngineError::Config(_))));
}

/// Starting a phase with an unmet prerequisite is the one fatal error class.
#[test]
fn test_unmet_prerequisite_is_fatal() {
    let mut machine =
        PhaseStateMachine::new(vec![spec("first", &[]), spec("second", &["first"])]).unwrap();

    let err = machine.mark_in_progress("second").unwrap_err();
    assert!(err.is_fatal());
}
