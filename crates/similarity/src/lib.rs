//! Plan Consensus Similarity
//!
//! Pluggable text-similarity scoring used by the consensus builder and the
//! gap/duplicate/obsolescence detector. Scorers are swappable behind the
//! [`SimilarityScorer`] trait so clustering and detection logic never depend
//! on a concrete metric:
//!
//! - `token_overlap` - Jaccard overlap over normalized tokens, plus an
//!   asymmetric coverage variant
//! - `edit_distance` - character-level diff ratio
//!
//! All scores are normalized to `[0.0, 1.0]`.

pub mod edit_distance;
pub mod scorer;
pub mod token_overlap;

pub use edit_distance::EditDistanceScorer;
pub use scorer::{build_scorer, ScorerKind, SimilarityScorer};
pub use token_overlap::TokenOverlapScorer;

/// Normalize text into comparison tokens: lowercase, split on
/// non-alphanumeric boundaries, drop empties.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}
