//! Similarity Scorer Trait
//!
//! The seam between text metrics and the engine. Clustering and detection
//! code hold an `Arc<dyn SimilarityScorer>` and never name a concrete metric.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::edit_distance::EditDistanceScorer;
use crate::token_overlap::TokenOverlapScorer;

/// A normalized text-similarity metric.
///
/// `score` is symmetric: `score(a, b) == score(b, a)`. `coverage` is the
/// asymmetric variant ("how much of `needle` is covered by `haystack`") used
/// for gap detection; metrics without a natural asymmetric form fall back to
/// the symmetric score.
pub trait SimilarityScorer: Send + Sync {
    /// Short identifier for logs and reports.
    fn name(&self) -> &'static str;

    /// Symmetric similarity in `[0.0, 1.0]`.
    fn score(&self, a: &str, b: &str) -> f64;

    /// Asymmetric coverage of `needle` by `haystack`, in `[0.0, 1.0]`.
    fn coverage(&self, needle: &str, haystack: &str) -> f64 {
        self.score(needle, haystack)
    }
}

/// Selectable scorer implementations for configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    /// Jaccard overlap over normalized tokens
    #[default]
    TokenOverlap,
    /// Character-level diff ratio
    EditDistance,
}

impl std::fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScorerKind::TokenOverlap => write!(f, "token_overlap"),
            ScorerKind::EditDistance => write!(f, "edit_distance"),
        }
    }
}

/// Construct the scorer named by a [`ScorerKind`].
pub fn build_scorer(kind: ScorerKind) -> Arc<dyn SimilarityScorer> {
    match kind {
        ScorerKind::TokenOverlap => Arc::new(TokenOverlapScorer),
        ScorerKind::EditDistance => Arc::new(EditDistanceScorer),
    }
}
