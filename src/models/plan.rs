//! Plan Models
//!
//! A Plan is a persistent unit of proposed work, independent of any single
//! analysis run. Plans are owned exclusively by the plan repository; all
//! mutation goes through the lifecycle editor so every change can be
//! journaled.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a plan. Deletion is soft: the record is retained
/// with a flipped status to support rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Plan is live and considered by detection scans
    Active,
    /// Plan was folded into a merge target
    Merged,
    /// Plan was retired
    Deleted,
}

impl PlanStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PlanStatus::Active)
    }

    /// Parse from a database string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PlanStatus::Active),
            "merged" => Some(PlanStatus::Merged),
            "deleted" => Some(PlanStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Active => write!(f, "active"),
            PlanStatus::Merged => write!(f, "merged"),
            PlanStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Plan priority. Low-priority plans with no consensus coverage are
/// candidates for obsolescence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl PlanPriority {
    /// Parse from a database string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(PlanPriority::Low),
            "medium" => Some(PlanPriority::Medium),
            "high" => Some(PlanPriority::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanPriority::Low => write!(f, "low"),
            PlanPriority::Medium => write!(f, "medium"),
            PlanPriority::High => write!(f, "high"),
        }
    }
}

/// A persistent plan record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique identifier
    pub plan_id: String,
    /// Short title
    pub title: String,
    /// Full plan text
    pub body: String,
    /// Priority
    pub priority: PlanPriority,
    /// Monotonic version counter, bumped on every mutation
    pub version: i64,
    /// Lifecycle status
    pub status: PlanStatus,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Last-mutation timestamp (RFC 3339)
    pub updated_at: String,
    /// Recommendation ids that motivated this plan, sorted
    pub source_recommendation_ids: Vec<String>,
}

impl Plan {
    /// Title and body joined for similarity comparison.
    pub fn full_text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.body)
        }
    }
}

/// Fields for a plan that does not exist yet (ADD and MERGE targets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub priority: PlanPriority,
    #[serde(default)]
    pub source_recommendation_ids: Vec<String>,
}

impl PlanDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: PlanPriority::default(),
            source_recommendation_ids: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: PlanPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sources(mut self, ids: Vec<String>) -> Self {
        self.source_recommendation_ids = ids;
        self
    }

    /// Materialize the draft as a version-1 Active plan.
    pub fn into_plan(self, plan_id: impl Into<String>, now: impl Into<String>) -> Plan {
        let now = now.into();
        let mut sources = self.source_recommendation_ids;
        sources.sort();
        sources.dedup();
        Plan {
            plan_id: plan_id.into(),
            title: self.title,
            body: self.body,
            priority: self.priority,
            version: 1,
            status: PlanStatus::Active,
            created_at: now.clone(),
            updated_at: now,
            source_recommendation_ids: sources,
        }
    }
}

/// A partial update for MODIFY proposals. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub priority: Option<PlanPriority>,
}

impl PlanPatch {
    /// Whether applying this patch to `plan` would change nothing.
    pub fn is_noop_for(&self, plan: &Plan) -> bool {
        self.title.as_ref().map_or(true, |t| *t == plan.title)
            && self.body.as_ref().map_or(true, |b| *b == plan.body)
            && self.priority.map_or(true, |p| p == plan.priority)
    }

    /// Apply the patch in place. Does not touch version or timestamps;
    /// the editor owns those.
    pub fn apply_to(&self, plan: &mut Plan) {
        if let Some(title) = &self.title {
            plan.title = title.clone();
        }
        if let Some(body) = &self.body {
            plan.body = body.clone();
        }
        if let Some(priority) = self.priority {
            plan.priority = priority;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        PlanDraft::new("Add retry logic", "Wrap outbound calls in retries")
            .into_plan("p1", "2026-01-01T00:00:00Z")
    }

    #[test]
    fn test_draft_into_plan_starts_at_version_one() {
        let plan = sample_plan();
        assert_eq!(plan.version, 1);
        assert_eq!(plan.status, PlanStatus::Active);
        assert_eq!(plan.created_at, plan.updated_at);
    }

    #[test]
    fn test_draft_sources_sorted_and_deduped() {
        let plan = PlanDraft::new("t", "b")
            .with_sources(vec!["r2".into(), "r1".into(), "r2".into()])
            .into_plan("p1", "2026-01-01T00:00:00Z");
        assert_eq!(plan.source_recommendation_ids, vec!["r1", "r2"]);
    }

    #[test]
    fn test_patch_noop_detection() {
        let plan = sample_plan();
        let noop = PlanPatch {
            title: Some(plan.title.clone()),
            ..Default::default()
        };
        assert!(noop.is_noop_for(&plan));

        let change = PlanPatch {
            body: Some("different".to_string()),
            ..Default::default()
        };
        assert!(!change.is_noop_for(&plan));
    }

    #[test]
    fn test_patch_apply_only_touches_set_fields() {
        let mut plan = sample_plan();
        let patch = PlanPatch {
            priority: Some(PlanPriority::High),
            ..Default::default()
        };
        patch.apply_to(&mut plan);
        assert_eq!(plan.priority, PlanPriority::High);
        assert_eq!(plan.title, "Add retry logic");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [PlanStatus::Active, PlanStatus::Merged, PlanStatus::Deleted] {
            assert_eq!(PlanStatus::from_str(&status.to_string()), Some(status));
        }
        assert_eq!(PlanStatus::from_str("unknown"), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PlanPriority::Low < PlanPriority::Medium);
        assert!(PlanPriority::Medium < PlanPriority::High);
    }
}
