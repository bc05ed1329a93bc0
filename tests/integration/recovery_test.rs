//! Crash-safe resumability: checkpoint adoption, cache-backed analyzer
//! skipping, run history, and cancellation.

use std::sync::Arc;

use plan_consensus::storage::checkpoint::{CheckpointStore, PhaseCheckpoint};
use plan_consensus::{
    default_phase_graph, Analyzer, Document, PhaseStatus, Recommendation, RunStatus,
};

use crate::common::{orchestrator, orchestrator_with_db, test_config, ScriptedAnalyzer};

fn unanimous_analyzers() -> (Arc<ScriptedAnalyzer>, Arc<ScriptedAnalyzer>) {
    (
        Arc::new(ScriptedAnalyzer::new("a1").with_output("doc-1", &[("r1", "Add retry logic")])),
        Arc::new(ScriptedAnalyzer::new("a2").with_output("doc-1", &[("r2", "Add retry logic")])),
    )
}

/// Re-invoking a finished run with the same run id adopts every checkpoint:
/// no analyzer runs again, no plan is duplicated, and the resumed reconcile
/// phase reports its previously applied proposals.
#[tokio::test(flavor = "multi_thread")]
async fn test_rerun_adopts_all_checkpoints() {
    let engine = orchestrator(test_config());
    let (a1, a2) = unanimous_analyzers();
    let analyzers: Vec<Arc<dyn Analyzer>> = vec![a1.clone(), a2.clone()];

    let docs = vec![Document::new("doc-1", "reliability")];
    let first = engine
        .clone()
        .run_once(
            "run-resume",
            default_phase_graph(&docs),
            analyzers.clone(),
            docs.clone(),
        )
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.proposals_applied, 1);
    assert_eq!(a1.call_count(), 1);

    let second = engine
        .clone()
        .run_once("run-resume", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.phases_completed, 5);
    // Adopted, not re-executed
    assert_eq!(a1.call_count(), 1);
    assert_eq!(a2.call_count(), 1);
    // The resumed reconcile checkpoint carries its applied count
    assert_eq!(second.proposals_applied, 1);
    assert_eq!(engine.editor().repository().list_plans().unwrap().len(), 1);
}

/// A pre-seeded analyze checkpoint replaces the analyzer invocation: the
/// pipeline builds consensus from the checkpointed outputs.
#[tokio::test(flavor = "multi_thread")]
async fn test_seeded_analyze_checkpoint_skips_invocation() {
    let (engine, db) = orchestrator_with_db(test_config());

    let rec = |id: &str, analyzer: &str| Recommendation {
        id: id.to_string(),
        title: "Add retry logic".to_string(),
        body: String::new(),
        source_analyzer_id: analyzer.to_string(),
        raw_confidence: 0.9,
    };
    let outputs = vec![vec![rec("r1", "a1")], vec![rec("r2", "a2")]];

    let store = CheckpointStore::new(db.pool());
    store
        .save(PhaseCheckpoint::new(
            "run-seeded",
            "analyze:doc-1",
            PhaseStatus::Completed,
            serde_json::to_value(&outputs).unwrap(),
        ))
        .await
        .unwrap();

    // This analyzer would produce nothing; it must never even be called
    let idle = Arc::new(ScriptedAnalyzer::new("a1"));
    let analyzers: Vec<Arc<dyn Analyzer>> = vec![idle.clone()];

    let docs = vec![Document::new("doc-1", "reliability")];
    let result = engine
        .clone()
        .run_once("run-seeded", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(idle.call_count(), 0);
    // Consensus over the checkpointed outputs auto-applied the unanimous ADD
    assert_eq!(result.proposals_applied, 1);
    assert_eq!(engine.editor().repository().list_plans().unwrap().len(), 1);
}

/// The analyzer cache spans runs: a different run id over the same
/// analyzer/document pair reuses the cached output.
#[tokio::test(flavor = "multi_thread")]
async fn test_cache_skips_reinvocation_across_runs() {
    let engine = orchestrator(test_config());
    let (a1, a2) = unanimous_analyzers();
    let analyzers: Vec<Arc<dyn Analyzer>> = vec![a1.clone(), a2.clone()];

    let docs = vec![Document::new("doc-1", "reliability")];
    engine
        .clone()
        .run_once(
            "run-cache-1",
            default_phase_graph(&docs),
            analyzers.clone(),
            docs.clone(),
        )
        .await
        .unwrap();
    assert_eq!(a1.call_count(), 1);

    let second = engine
        .clone()
        .run_once("run-cache-2", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(a1.call_count(), 1, "cache must prevent re-invocation");
    assert_eq!(a2.call_count(), 1);
    // The plan from the first run now covers the recommendation, so the
    // second run has no gap to fill
    assert_eq!(engine.editor().repository().list_plans().unwrap().len(), 1);

    let state = engine.state().snapshot();
    assert!(state.cache_hits >= 2);
}

/// Interrupted runs are discoverable with their checkpoint counts.
#[tokio::test(flavor = "multi_thread")]
async fn test_incomplete_runs_are_listed() {
    let (_engine, db) = orchestrator_with_db(test_config());

    db.register_run("run-crashed").unwrap();
    let store = CheckpointStore::new(db.pool());
    store
        .save(PhaseCheckpoint::new(
            "run-crashed",
            "analyze:doc-1",
            PhaseStatus::Completed,
            serde_json::Value::Null,
        ))
        .await
        .unwrap();

    let incomplete = db.incomplete_runs().unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].run_id, "run-crashed");
    assert_eq!(incomplete[0].checkpoint_count, 1);
}

/// Cancellation is honored between phases: an already-cancelled token stops
/// the run before any phase executes.
#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_between_phases() {
    let engine = orchestrator(test_config());
    engine.cancellation_token().cancel();

    let (a1, a2) = unanimous_analyzers();
    let analyzers: Vec<Arc<dyn Analyzer>> = vec![a1.clone(), a2];

    let docs = vec![Document::new("doc-1", "reliability")];
    let result = engine
        .clone()
        .run_once("run-cancelled", default_phase_graph(&docs), analyzers, docs)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.phases_completed, 0);
    assert_eq!(a1.call_count(), 0);
    assert!(result
        .errors
        .iter()
        .any(|e| e.message.contains("cancelled")));

    // The run remains discoverable for resume
    let report = engine.editor().repository().list_plans().unwrap();
    assert!(report.is_empty());
}
