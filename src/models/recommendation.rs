//! Recommendation Models
//!
//! Inputs to the consensus pipeline: documents handed to analyzers, the raw
//! recommendations analyzers emit, and the deduplicated consensus records
//! the builder produces.

use serde::{Deserialize, Serialize};

/// A source document handed to every analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier used for cache keys and phase names
    pub document_id: String,
    /// Raw document content
    pub content: String,
}

impl Document {
    pub fn new(document_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            content: content.into(),
        }
    }
}

/// One candidate recommendation emitted by an analyzer. Immutable once
/// emitted; consumed exactly once by the consensus builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Unique identifier assigned by the emitting analyzer
    pub id: String,
    /// Short title
    pub title: String,
    /// Full recommendation text
    pub body: String,
    /// Identifier of the analyzer that produced this recommendation
    pub source_analyzer_id: String,
    /// The analyzer's own confidence in [0, 1]
    pub raw_confidence: f64,
}

impl Recommendation {
    /// Title and body joined for similarity comparison and text selection.
    pub fn full_text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.body)
        }
    }
}

/// One deduplicated recommendation formed by clustering near-identical
/// outputs from multiple analyzers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRecommendation {
    /// Cluster identifier, stable within a run
    pub cluster_id: String,
    /// Ids of every member recommendation, sorted
    pub member_recommendation_ids: Vec<String>,
    /// Deterministically selected representative text
    pub chosen_text: String,
    /// |supporting_analyzers| / total analyzers queried
    pub agreement_ratio: f64,
    /// Distinct analyzers with at least one member in this cluster, sorted
    pub supporting_analyzers: Vec<String>,
}

impl ConsensusRecommendation {
    /// Number of member recommendations in the cluster.
    pub fn size(&self) -> usize {
        self.member_recommendation_ids.len()
    }
}
