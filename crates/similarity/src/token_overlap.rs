//! Token Overlap Scorer
//!
//! Jaccard similarity over normalized tokens, with an asymmetric coverage
//! variant for "does this plan cover that recommendation" checks.

use std::collections::HashSet;

use crate::scorer::SimilarityScorer;
use crate::tokenize;

/// Jaccard token-overlap similarity.
pub struct TokenOverlapScorer;

impl TokenOverlapScorer {
    fn token_set(text: &str) -> HashSet<String> {
        tokenize(text).into_iter().collect()
    }
}

impl SimilarityScorer for TokenOverlapScorer {
    fn name(&self) -> &'static str {
        "token_overlap"
    }

    /// |A ∩ B| / |A ∪ B|. Two empty texts score 1.0; one empty text scores 0.0.
    fn score(&self, a: &str, b: &str) -> f64 {
        let set_a = Self::token_set(a);
        let set_b = Self::token_set(b);

        if set_a.is_empty() && set_b.is_empty() {
            return 1.0;
        }
        if set_a.is_empty() || set_b.is_empty() {
            return 0.0;
        }

        let intersection = set_a.intersection(&set_b).count();
        let union = set_a.union(&set_b).count();
        intersection as f64 / union as f64
    }

    /// |needle ∩ haystack| / |needle|: the fraction of the needle's tokens
    /// present in the haystack. An empty needle is trivially covered.
    fn coverage(&self, needle: &str, haystack: &str) -> f64 {
        let needle_set = Self::token_set(needle);
        if needle_set.is_empty() {
            return 1.0;
        }
        let haystack_set = Self::token_set(haystack);

        let covered = needle_set.intersection(&haystack_set).count();
        covered as f64 / needle_set.len() as f64
    }
}
