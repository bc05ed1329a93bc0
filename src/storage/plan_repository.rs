//! Plan Repository
//!
//! Durable plan records plus the append-only mutation journal. The
//! repository only knows how to read, write, and restore rows; lifecycle
//! rules (versioning, confidence gating, merge semantics) live in the
//! editor.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use uuid::Uuid;

use crate::models::plan::{Plan, PlanPriority, PlanStatus};
use crate::models::proposal::ModificationProposal;
use crate::utils::error::{EngineError, EngineResult};

/// One reversible journal record: the proposal that ran plus full plan
/// snapshots before and after. Sufficient to reverse the mutation exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique entry id
    pub id: String,
    /// Run the mutation belongs to
    pub run_id: String,
    /// Phase the mutation is attributed to, if any
    pub phase_id: Option<String>,
    /// The applied proposal
    pub proposal: ModificationProposal,
    /// Plans as they were before the mutation (empty for pure inserts)
    pub prior_state: Vec<Plan>,
    /// Plans as they are after the mutation
    pub new_state: Vec<Plan>,
    /// When the mutation was journaled (RFC 3339)
    pub created_at: String,
}

impl JournalEntry {
    pub fn new(
        run_id: impl Into<String>,
        phase_id: Option<String>,
        proposal: ModificationProposal,
        prior_state: Vec<Plan>,
        new_state: Vec<Plan>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            phase_id,
            proposal,
            prior_state,
            new_state,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Compact line-diff summary of the mutation, for logs and review.
    pub fn change_summary(&self) -> String {
        let before = serde_json::to_string_pretty(&self.prior_state).unwrap_or_default();
        let after = serde_json::to_string_pretty(&self.new_state).unwrap_or_default();
        let diff = TextDiff::from_lines(&before, &after);

        let mut added = 0usize;
        let mut removed = 0usize;
        for change in diff.iter_all_changes() {
            match change.tag() {
                similar::ChangeTag::Insert => added += 1,
                similar::ChangeTag::Delete => removed += 1,
                similar::ChangeTag::Equal => {}
            }
        }
        format!(
            "{}: {} plan(s) touched, +{} -{} lines",
            self.proposal.action.label(),
            self.new_state.len(),
            added,
            removed
        )
    }
}

/// Raw plan row before JSON fields are parsed.
struct RawPlanRow {
    plan_id: String,
    title: String,
    body: String,
    priority: String,
    version: i64,
    status: String,
    created_at: String,
    updated_at: String,
    source_recommendation_ids: String,
}

fn parse_plan_row(raw: RawPlanRow) -> EngineResult<Plan> {
    let priority = PlanPriority::from_str(&raw.priority)
        .ok_or_else(|| EngineError::database(format!("Unknown plan priority: {}", raw.priority)))?;
    let status = PlanStatus::from_str(&raw.status)
        .ok_or_else(|| EngineError::database(format!("Unknown plan status: {}", raw.status)))?;
    let source_recommendation_ids: Vec<String> =
        serde_json::from_str(&raw.source_recommendation_ids)?;

    Ok(Plan {
        plan_id: raw.plan_id,
        title: raw.title,
        body: raw.body,
        priority,
        version: raw.version,
        status,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
        source_recommendation_ids,
    })
}

const PLAN_COLUMNS: &str = "plan_id, title, body, priority, version, status,
             created_at, updated_at, source_recommendation_ids";

/// SQLite-backed plan store.
#[derive(Clone)]
pub struct PlanRepository {
    pool: Pool<SqliteConnectionManager>,
}

impl PlanRepository {
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> EngineResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))
    }

    /// Insert a new plan. Fails if the id already exists.
    pub fn insert_plan(&self, plan: &Plan) -> EngineResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO plans (plan_id, title, body, priority, version, status,
                                created_at, updated_at, source_recommendation_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                plan.plan_id,
                plan.title,
                plan.body,
                plan.priority.to_string(),
                plan.version,
                plan.status.to_string(),
                plan.created_at,
                plan.updated_at,
                serde_json::to_string(&plan.source_recommendation_ids)?,
            ],
        )?;
        Ok(())
    }

    /// Overwrite every field of an existing plan row.
    pub fn update_plan(&self, plan: &Plan) -> EngineResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE plans SET title = ?2, body = ?3, priority = ?4, version = ?5,
                              status = ?6, created_at = ?7, updated_at = ?8,
                              source_recommendation_ids = ?9
             WHERE plan_id = ?1",
            params![
                plan.plan_id,
                plan.title,
                plan.body,
                plan.priority.to_string(),
                plan.version,
                plan.status.to_string(),
                plan.created_at,
                plan.updated_at,
                serde_json::to_string(&plan.source_recommendation_ids)?,
            ],
        )?;
        if updated == 0 {
            return Err(EngineError::not_found(format!(
                "Plan not found: {}",
                plan.plan_id
            )));
        }
        Ok(())
    }

    /// Restore an exact plan snapshot, inserting or overwriting as needed.
    /// Used by rollback; bypasses version rules deliberately.
    pub fn restore_snapshot(&self, plan: &Plan) -> EngineResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO plans
                (plan_id, title, body, priority, version, status,
                 created_at, updated_at, source_recommendation_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                plan.plan_id,
                plan.title,
                plan.body,
                plan.priority.to_string(),
                plan.version,
                plan.status.to_string(),
                plan.created_at,
                plan.updated_at,
                serde_json::to_string(&plan.source_recommendation_ids)?,
            ],
        )?;
        Ok(())
    }

    /// Hard-remove a plan row. Only rollback uses this, to reverse an
    /// insert exactly.
    pub fn remove_plan(&self, plan_id: &str) -> EngineResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM plans WHERE plan_id = ?1", params![plan_id])?;
        Ok(removed > 0)
    }

    /// Fetch one plan by id.
    pub fn get_plan(&self, plan_id: &str) -> EngineResult<Option<Plan>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM plans WHERE plan_id = ?1", PLAN_COLUMNS),
            params![plan_id],
            Self::map_raw_row,
        );

        match result {
            Ok(raw) => Ok(Some(parse_plan_row(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All plans, ordered by creation time then id for stable output.
    pub fn list_plans(&self) -> EngineResult<Vec<Plan>> {
        self.query_plans(&format!(
            "SELECT {} FROM plans ORDER BY created_at, plan_id",
            PLAN_COLUMNS
        ))
    }

    /// Active plans only.
    pub fn list_active(&self) -> EngineResult<Vec<Plan>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM plans WHERE status = 'active' ORDER BY created_at, plan_id",
            PLAN_COLUMNS
        ))?;
        let rows: Vec<RawPlanRow> = stmt
            .query_map([], Self::map_raw_row)?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter().map(parse_plan_row).collect()
    }

    /// Active plan with exactly this title and body, if any. Supports
    /// idempotent ADD.
    pub fn find_active_by_content(&self, title: &str, body: &str) -> EngineResult<Option<Plan>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!(
                "SELECT {} FROM plans
                 WHERE status = 'active' AND title = ?1 AND body = ?2
                 ORDER BY created_at LIMIT 1",
                PLAN_COLUMNS
            ),
            params![title, body],
            Self::map_raw_row,
        );

        match result {
            Ok(raw) => Ok(Some(parse_plan_row(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn query_plans(&self, sql: &str) -> EngineResult<Vec<Plan>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<RawPlanRow> = stmt
            .query_map([], Self::map_raw_row)?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter().map(parse_plan_row).collect()
    }

    fn map_raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPlanRow> {
        Ok(RawPlanRow {
            plan_id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            priority: row.get(3)?,
            version: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            source_recommendation_ids: row.get(8)?,
        })
    }

    // ========================================================================
    // Journal
    // ========================================================================

    /// Append one reversible mutation record.
    pub fn append_journal(&self, entry: &JournalEntry) -> EngineResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO plan_journal
                (id, run_id, phase_id, proposal, prior_state, new_state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.run_id,
                entry.phase_id,
                serde_json::to_string(&entry.proposal)?,
                serde_json::to_string(&entry.prior_state)?,
                serde_json::to_string(&entry.new_state)?,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// Journal entries for one run, oldest first.
    pub fn journal_for_run(&self, run_id: &str) -> EngineResult<Vec<JournalEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, phase_id, proposal, prior_state, new_state, created_at
             FROM plan_journal WHERE run_id = ?1
             ORDER BY created_at, id",
        )?;

        struct RawJournalRow {
            id: String,
            run_id: String,
            phase_id: Option<String>,
            proposal: String,
            prior_state: String,
            new_state: String,
            created_at: String,
        }

        let rows: Vec<RawJournalRow> = stmt
            .query_map(params![run_id], |row| {
                Ok(RawJournalRow {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    phase_id: row.get(2)?,
                    proposal: row.get(3)?,
                    prior_state: row.get(4)?,
                    new_state: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut entries = Vec::with_capacity(rows.len());
        for raw in rows {
            entries.push(JournalEntry {
                id: raw.id,
                run_id: raw.run_id,
                phase_id: raw.phase_id,
                proposal: serde_json::from_str(&raw.proposal)?,
                prior_state: serde_json::from_str(&raw.prior_state)?,
                new_state: serde_json::from_str(&raw.new_state)?,
                created_at: raw.created_at,
            });
        }
        Ok(entries)
    }

    /// Remove one journal entry (after it has been rolled back).
    pub fn remove_journal_entry(&self, entry_id: &str) -> EngineResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM plan_journal WHERE id = ?1",
            params![entry_id],
        )?;
        Ok(removed > 0)
    }

    /// Reverse one journal entry exactly: restore every prior snapshot and
    /// remove plans that exist only in the new state.
    pub fn rollback_entry(&self, entry: &JournalEntry) -> EngineResult<()> {
        for plan in &entry.new_state {
            let had_prior = entry
                .prior_state
                .iter()
                .any(|p| p.plan_id == plan.plan_id);
            if !had_prior {
                self.remove_plan(&plan.plan_id)?;
            }
        }
        for plan in &entry.prior_state {
            self.restore_snapshot(plan)?;
        }
        Ok(())
    }
}
