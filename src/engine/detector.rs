//! Gap / Duplicate / Obsolescence Detector
//!
//! Three independent, read-only scans over the consensus list and the plan
//! repository contents. The detector only emits [`ModificationProposal`]
//! values; it never mutates anything itself.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use plan_consensus_similarity::SimilarityScorer;

use crate::models::plan::{Plan, PlanDraft, PlanPriority};
use crate::models::proposal::{ModificationProposal, ProposalAction};
use crate::models::recommendation::ConsensusRecommendation;

/// Short display title derived from a recommendation text.
fn derive_title(text: &str) -> String {
    text.split_whitespace()
        .take(10)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Detection scans configured with their thresholds.
pub struct Detector {
    scorer: Arc<dyn SimilarityScorer>,
    coverage_threshold: f64,
    duplicate_threshold: f64,
    obsolescence_confidence_cap: f64,
}

impl Detector {
    pub fn new(
        scorer: Arc<dyn SimilarityScorer>,
        coverage_threshold: f64,
        duplicate_threshold: f64,
        obsolescence_confidence_cap: f64,
    ) -> Self {
        Self {
            scorer,
            coverage_threshold,
            duplicate_threshold,
            obsolescence_confidence_cap,
        }
    }

    /// Run all three scans. Only Active plans participate.
    pub fn detect(
        &self,
        consensus: &[ConsensusRecommendation],
        plans: &[Plan],
    ) -> Vec<ModificationProposal> {
        let active: Vec<&Plan> = plans.iter().filter(|p| p.status.is_active()).collect();

        let mut proposals = self.scan_gaps(consensus, &active);
        proposals.extend(self.scan_duplicates(&active));
        proposals.extend(self.scan_obsolescence(consensus, &active));

        debug!(proposals = proposals.len(), "detection scans finished");
        proposals
    }

    /// Best coverage of `text` across the active plans.
    fn best_coverage(&self, text: &str, active: &[&Plan]) -> f64 {
        active
            .iter()
            .map(|p| self.scorer.coverage(text, &p.full_text()))
            .fold(0.0, f64::max)
    }

    /// Gap scan: consensus recommendations no plan covers become ADDs,
    /// confident in proportion to analyzer agreement.
    fn scan_gaps(
        &self,
        consensus: &[ConsensusRecommendation],
        active: &[&Plan],
    ) -> Vec<ModificationProposal> {
        let mut proposals = Vec::new();
        for rec in consensus {
            let coverage = self.best_coverage(&rec.chosen_text, active);
            if coverage >= self.coverage_threshold {
                continue;
            }

            let draft = PlanDraft::new(derive_title(&rec.chosen_text), rec.chosen_text.clone())
                .with_sources(rec.member_recommendation_ids.clone());
            proposals.push(ModificationProposal::new(
                ProposalAction::Add { draft },
                rec.agreement_ratio,
                format!(
                    "no existing plan covers \"{}\" (best coverage {:.2}, {} of the analyzers agree)",
                    derive_title(&rec.chosen_text),
                    coverage,
                    rec.supporting_analyzers.len(),
                ),
            ));
        }
        proposals
    }

    /// Duplicate scan: near-identical Active plan pairs become MERGEs.
    /// Each plan joins at most one merge proposal per run so proposals
    /// never conflict over the same input.
    fn scan_duplicates(&self, active: &[&Plan]) -> Vec<ModificationProposal> {
        let mut proposals = Vec::new();
        let mut claimed: HashSet<&str> = HashSet::new();

        for i in 0..active.len() {
            if claimed.contains(active[i].plan_id.as_str()) {
                continue;
            }
            for j in (i + 1)..active.len() {
                if claimed.contains(active[j].plan_id.as_str()) {
                    continue;
                }

                let similarity = self
                    .scorer
                    .score(&active[i].full_text(), &active[j].full_text());
                if similarity < self.duplicate_threshold {
                    continue;
                }

                let (a, b) = (active[i], active[j]);
                // The richer plan donates the target's text
                let survivor = if a.full_text().len() >= b.full_text().len() {
                    a
                } else {
                    b
                };
                let mut sources: Vec<String> = a
                    .source_recommendation_ids
                    .iter()
                    .chain(b.source_recommendation_ids.iter())
                    .cloned()
                    .collect();
                sources.sort();
                sources.dedup();

                let target = PlanDraft::new(survivor.title.clone(), survivor.body.clone())
                    .with_priority(a.priority.max(b.priority))
                    .with_sources(sources);

                proposals.push(ModificationProposal::new(
                    ProposalAction::Merge {
                        plan_ids: vec![a.plan_id.clone(), b.plan_id.clone()],
                        target,
                    },
                    similarity,
                    format!(
                        "plans {} and {} are near-duplicates (similarity {:.2})",
                        a.plan_id, b.plan_id, similarity
                    ),
                ));
                claimed.insert(a.plan_id.as_str());
                claimed.insert(b.plan_id.as_str());
                break;
            }
        }
        proposals
    }

    /// Obsolescence scan: low-priority Active plans nothing in the current
    /// consensus references become DELETEs. Confidence is capped so
    /// deletions always route through human approval.
    fn scan_obsolescence(
        &self,
        consensus: &[ConsensusRecommendation],
        active: &[&Plan],
    ) -> Vec<ModificationProposal> {
        let mut proposals = Vec::new();
        for plan in active {
            if plan.priority != PlanPriority::Low {
                continue;
            }

            let best = consensus
                .iter()
                .map(|rec| self.scorer.coverage(&rec.chosen_text, &plan.full_text()))
                .fold(0.0, f64::max);
            if best >= self.coverage_threshold {
                continue;
            }

            let confidence = (1.0 - best).min(self.obsolescence_confidence_cap);
            proposals.push(ModificationProposal::new(
                ProposalAction::Delete {
                    plan_id: plan.plan_id.clone(),
                    reason: "low-priority plan unreferenced by the current consensus".to_string(),
                },
                confidence,
                format!(
                    "plan {} has priority low and best consensus coverage {:.2}",
                    plan.plan_id, best
                ),
            ));
        }
        proposals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::PlanStatus;
    use plan_consensus_similarity::{build_scorer, ScorerKind};

    fn detector() -> Detector {
        Detector::new(build_scorer(ScorerKind::TokenOverlap), 0.5, 0.85, 0.6)
    }

    fn consensus_rec(id: &str, text: &str, ratio: f64) -> ConsensusRecommendation {
        ConsensusRecommendation {
            cluster_id: format!("cluster-{}", id),
            member_recommendation_ids: vec![id.to_string()],
            chosen_text: text.to_string(),
            agreement_ratio: ratio,
            supporting_analyzers: vec!["a1".to_string()],
        }
    }

    fn plan(id: &str, title: &str, body: &str) -> Plan {
        PlanDraft::new(title, body).into_plan(id, "2026-01-01T00:00:00Z")
    }

    #[test]
    fn test_gap_scan_proposes_add_for_uncovered() {
        let consensus = vec![consensus_rec("r1", "add retry logic to outbound calls", 0.8)];
        let plans = vec![plan("p1", "Improve docs", "Rewrite the onboarding guide")];

        let proposals = detector().detect(&consensus, &plans);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].action.label(), "add");
        assert!((proposals[0].confidence - 0.8).abs() < f64::EPSILON);
        match &proposals[0].action {
            ProposalAction::Add { draft } => {
                assert_eq!(draft.source_recommendation_ids, vec!["r1"]);
                assert_eq!(draft.body, "add retry logic to outbound calls");
            }
            other => panic!("expected add, got {:?}", other),
        }
    }

    #[test]
    fn test_gap_scan_skips_covered_recommendations() {
        let consensus = vec![consensus_rec("r1", "add retry logic", 0.8)];
        let plans = vec![plan(
            "p1",
            "Add retry logic",
            "add retry logic to every outbound call",
        )];

        let proposals = detector().detect(&consensus, &plans);
        assert!(proposals.is_empty());
    }

    #[test]
    fn test_duplicate_scan_proposes_merge() {
        let plans = vec![
            plan("p1", "Add retry logic", "wrap outbound calls in retries"),
            plan("p2", "Add retry logic", "wrap outbound calls in retries now"),
            plan("p3", "Improve docs", "rewrite onboarding"),
        ];

        let proposals = detector().detect(&[], &plans);
        let merges: Vec<_> = proposals
            .iter()
            .filter(|p| p.action.label() == "merge")
            .collect();
        assert_eq!(merges.len(), 1);
        match &merges[0].action {
            ProposalAction::Merge { plan_ids, target } => {
                assert_eq!(plan_ids, &vec!["p1".to_string(), "p2".to_string()]);
                // Longer body becomes the target draft
                assert_eq!(target.body, "wrap outbound calls in retries now");
            }
            other => panic!("expected merge, got {:?}", other),
        }
        assert!(merges[0].confidence >= 0.85);
    }

    #[test]
    fn test_duplicate_scan_claims_each_plan_once() {
        let plans = vec![
            plan("p1", "Add retry logic", "wrap calls in retries"),
            plan("p2", "Add retry logic", "wrap calls in retries"),
            plan("p3", "Add retry logic", "wrap calls in retries"),
        ];

        let proposals = detector().detect(&[], &plans);
        let merges: Vec<_> = proposals
            .iter()
            .filter(|p| p.action.label() == "merge")
            .collect();
        // p1+p2 merge; p3 is left for the next run rather than double-claimed
        assert_eq!(merges.len(), 1);
    }

    #[test]
    fn test_obsolescence_scan_targets_unreferenced_low_priority() {
        let mut stale = plan("p1", "Tidy scripts", "clean up the old build scripts");
        stale.priority = PlanPriority::Low;
        let mut kept = plan("p2", "Tidy docs", "clean up the old docs tree");
        kept.priority = PlanPriority::Medium;

        let consensus = vec![consensus_rec("r1", "ship the new importer", 0.9)];
        let proposals = detector().detect(&consensus, &[stale, kept]);

        let deletes: Vec<_> = proposals
            .iter()
            .filter(|p| p.action.label() == "delete")
            .collect();
        assert_eq!(deletes.len(), 1);
        match &deletes[0].action {
            ProposalAction::Delete { plan_id, .. } => assert_eq!(plan_id, "p1"),
            other => panic!("expected delete, got {:?}", other),
        }
        // Confidence is capped below the auto-approve threshold
        assert!(deletes[0].confidence <= 0.6);
    }

    #[test]
    fn test_obsolescence_spares_referenced_plans() {
        let mut low = plan("p1", "Add retry logic", "wrap outbound calls in retries");
        low.priority = PlanPriority::Low;

        let consensus = vec![consensus_rec("r1", "add retry logic outbound calls", 0.9)];
        let proposals = detector().detect(&consensus, &[low]);
        assert!(proposals.iter().all(|p| p.action.label() != "delete"));
    }

    #[test]
    fn test_inactive_plans_are_invisible() {
        let mut merged = plan("p1", "Add retry logic", "wrap calls");
        merged.status = PlanStatus::Merged;
        let mut deleted = plan("p2", "Add retry logic", "wrap calls");
        deleted.status = PlanStatus::Deleted;

        let consensus = vec![consensus_rec("r1", "add retry logic wrap calls", 0.9)];
        let proposals = detector().detect(&consensus, &[merged, deleted]);

        // The recommendation is a gap (covering plans are not Active), and
        // the inactive pair must not trigger a merge.
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].action.label(), "add");
    }

    #[test]
    fn test_scans_are_side_effect_free() {
        let plans = vec![plan("p1", "Add retry logic", "wrap calls")];
        let before = plans.clone();
        let _ = detector().detect(&[], &plans);
        assert_eq!(plans, before);
    }

    #[test]
    fn test_derive_title_truncates_to_ten_words() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        assert_eq!(
            derive_title(text),
            "one two three four five six seven eight nine ten"
        );
    }
}
