//! Shared test fixtures: scripted analyzers and orchestrator builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use plan_consensus::{
    Analyzer, Database, Document, EngineConfig, EngineResult, Orchestrator, Recommendation,
};

/// Analyzer that replays scripted recommendations and counts invocations.
pub struct ScriptedAnalyzer {
    analyzer_id: String,
    outputs: HashMap<String, Vec<Recommendation>>,
    pub calls: AtomicU32,
}

impl ScriptedAnalyzer {
    pub fn new(analyzer_id: &str) -> Self {
        Self {
            analyzer_id: analyzer_id.to_string(),
            outputs: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    /// Script one recommendation (id, text) list for a document.
    pub fn with_output(mut self, document_id: &str, recommendations: &[(&str, &str)]) -> Self {
        let recs = recommendations
            .iter()
            .map(|(id, text)| Recommendation {
                id: id.to_string(),
                title: text.to_string(),
                body: String::new(),
                source_analyzer_id: self.analyzer_id.clone(),
                raw_confidence: 0.8,
            })
            .collect();
        self.outputs.insert(document_id.to_string(), recs);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    fn id(&self) -> &str {
        &self.analyzer_id
    }

    async fn analyze(&self, document: &Document) -> EngineResult<Vec<Recommendation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .outputs
            .get(&document.document_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Config tuned for tests: default thresholds, but approvals time out fast
/// unless a test connects a reviewer.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        approval_timeout_secs: 0,
        ..Default::default()
    }
}

/// Orchestrator over a fresh in-memory database.
pub fn orchestrator(config: EngineConfig) -> Arc<Orchestrator> {
    let db = Database::new_in_memory().unwrap();
    Arc::new(Orchestrator::new(config, db).unwrap())
}

/// Orchestrator plus the database handle, for tests that need to inspect or
/// rebuild over the same storage.
pub fn orchestrator_with_db(config: EngineConfig) -> (Arc<Orchestrator>, Database) {
    let db = Database::new_in_memory().unwrap();
    let orchestrator = Arc::new(Orchestrator::new(config, db.clone()).unwrap());
    (orchestrator, db)
}
