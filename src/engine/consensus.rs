//! Consensus Builder
//!
//! Turns N analyzers' candidate lists for one document into a single
//! deduplicated, voted-on consensus list. Near-duplicate recommendations are
//! transitively clustered by a pluggable similarity score; each cluster's
//! representative text is selected by a total-order rule so output is
//! reproducible regardless of input order.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use plan_consensus_similarity::SimilarityScorer;

use crate::models::recommendation::{ConsensusRecommendation, Recommendation};

/// Disjoint-set forest for transitive cluster merging.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Smaller root index wins so grouping is order-independent
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Clusters recommendations and produces the consensus list.
pub struct ConsensusBuilder {
    scorer: Arc<dyn SimilarityScorer>,
    similarity_threshold: f64,
}

impl ConsensusBuilder {
    pub fn new(scorer: Arc<dyn SimilarityScorer>, similarity_threshold: f64) -> Self {
        Self {
            scorer,
            similarity_threshold,
        }
    }

    /// Build the consensus list from one analyzer-output list per queried
    /// analyzer that succeeded.
    ///
    /// With fewer than 2 analyzer outputs available, clustering degrades to
    /// pass-through (every recommendation its own cluster) and a
    /// low-agreement warning is logged instead of failing.
    pub fn build(&self, analyzer_outputs: &[Vec<Recommendation>]) -> Vec<ConsensusRecommendation> {
        let total_analyzers = analyzer_outputs.len();
        if total_analyzers == 0 {
            return Vec::new();
        }

        let mut all: Vec<Recommendation> = analyzer_outputs.iter().flatten().cloned().collect();
        // Canonical processing order: by recommendation id
        all.sort_by(|a, b| a.id.cmp(&b.id));

        let degraded = total_analyzers < 2;
        if degraded {
            warn!(
                analyzer_outputs = total_analyzers,
                "fewer than 2 analyzer outputs available; consensus degrades to pass-through \
                 with low agreement"
            );
        }

        let mut uf = UnionFind::new(all.len());
        if !degraded {
            let texts: Vec<String> = all.iter().map(|r| r.full_text()).collect();
            for i in 0..all.len() {
                for j in (i + 1)..all.len() {
                    let score = self.scorer.score(&texts[i], &texts[j]);
                    if score >= self.similarity_threshold {
                        uf.union(i, j);
                    }
                }
            }
        }

        // Group members by cluster root
        let mut clusters: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
        for i in 0..all.len() {
            clusters.entry(uf.find(i)).or_default().push(i);
        }

        let mut consensus: Vec<ConsensusRecommendation> = clusters
            .into_values()
            .map(|members| self.summarize_cluster(&all, &members, total_analyzers))
            .collect();

        // Total order: agreement desc, cluster size desc, cluster id asc
        consensus.sort_by(|a, b| {
            b.agreement_ratio
                .partial_cmp(&a.agreement_ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.size().cmp(&a.size()))
                .then_with(|| a.cluster_id.cmp(&b.cluster_id))
        });

        debug!(
            clusters = consensus.len(),
            recommendations = all.len(),
            "consensus built"
        );
        consensus
    }

    fn summarize_cluster(
        &self,
        all: &[Recommendation],
        members: &[usize],
        total_analyzers: usize,
    ) -> ConsensusRecommendation {
        let mut member_ids: Vec<String> = members.iter().map(|&i| all[i].id.clone()).collect();
        member_ids.sort();

        let supporting: BTreeSet<String> = members
            .iter()
            .map(|&i| all[i].source_analyzer_id.clone())
            .collect();

        // Longest member text wins; ties break toward the lowest id so the
        // choice is a total order, not an iteration-order artifact.
        let chosen = members
            .iter()
            .map(|&i| &all[i])
            .max_by(|a, b| {
                a.full_text()
                    .len()
                    .cmp(&b.full_text().len())
                    .then_with(|| b.id.cmp(&a.id))
            })
            .expect("cluster has at least one member");

        ConsensusRecommendation {
            cluster_id: format!("cluster-{}", member_ids[0]),
            chosen_text: chosen.full_text(),
            agreement_ratio: supporting.len() as f64 / total_analyzers as f64,
            supporting_analyzers: supporting.into_iter().collect(),
            member_recommendation_ids: member_ids,
        }
    }
}
