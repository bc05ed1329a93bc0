//! Edit Distance Scorer
//!
//! Character-level similarity via `similar`'s diff ratio. Texts are
//! normalized to lowercase token streams first so punctuation and casing
//! differences do not dominate the distance.

use similar::TextDiff;

use crate::scorer::SimilarityScorer;
use crate::tokenize;

/// Diff-ratio similarity over normalized text.
pub struct EditDistanceScorer;

impl EditDistanceScorer {
    fn normalize(text: &str) -> String {
        tokenize(text).join(" ")
    }
}

impl SimilarityScorer for EditDistanceScorer {
    fn name(&self) -> &'static str {
        "edit_distance"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        let na = Self::normalize(a);
        let nb = Self::normalize(b);

        if na.is_empty() && nb.is_empty() {
            return 1.0;
        }
        if na.is_empty() || nb.is_empty() {
            return 0.0;
        }

        TextDiff::from_chars(na.as_str(), nb.as_str()).ratio() as f64
    }
}
