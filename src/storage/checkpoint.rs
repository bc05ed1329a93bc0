//! Checkpoint Store
//!
//! Durable per-(run, phase) progress snapshots so an interrupted multi-hour
//! batch resumes without redoing completed work. Writes are upserts keyed by
//! `(run_id, phase_id)`, so concurrent phases never contend on the same key.
//!
//! Pool access goes through `spawn_blocking` so the async orchestrator never
//! blocks a runtime worker on SQLite.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::phase::PhaseStatus;
use crate::utils::error::{EngineError, EngineResult};

/// One durable snapshot of a phase's progress within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseCheckpoint {
    /// Run the snapshot belongs to
    pub run_id: String,
    /// Phase the snapshot belongs to
    pub phase_id: String,
    /// Phase status at snapshot time
    pub status: PhaseStatus,
    /// Opaque serialized progress (phase-kind specific)
    pub progress: Value,
    /// When the snapshot was written (RFC 3339)
    pub created_at: String,
}

impl PhaseCheckpoint {
    pub fn new(
        run_id: impl Into<String>,
        phase_id: impl Into<String>,
        status: PhaseStatus,
        progress: Value,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            phase_id: phase_id.into(),
            status,
            progress,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// SQLite-backed checkpoint storage.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: Pool<SqliteConnectionManager>,
}

impl CheckpointStore {
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    /// Save (upsert) one checkpoint.
    pub async fn save(&self, checkpoint: PhaseCheckpoint) -> EngineResult<()> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

            let progress_json = serde_json::to_string(&checkpoint.progress)?;

            conn.execute(
                "INSERT OR REPLACE INTO checkpoints
                    (run_id, phase_id, status, progress, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    checkpoint.run_id,
                    checkpoint.phase_id,
                    checkpoint.status.to_string(),
                    progress_json,
                    checkpoint.created_at,
                ],
            )?;

            Ok(())
        })
        .await
        .map_err(|e| EngineError::database(format!("Task join error: {}", e)))?
    }

    /// Load the latest checkpoint per phase for one run.
    pub async fn load_for_run(&self, run_id: &str) -> EngineResult<Vec<PhaseCheckpoint>> {
        let pool = self.pool.clone();
        let rid = run_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

            let mut stmt = conn.prepare(
                "SELECT run_id, phase_id, status, progress, created_at
                 FROM checkpoints WHERE run_id = ?1
                 ORDER BY phase_id",
            )?;

            let rows: Vec<(String, String, String, String, String)> = stmt
                .query_map(rusqlite::params![rid], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();

            let mut checkpoints = Vec::with_capacity(rows.len());
            for (run_id, phase_id, status, progress, created_at) in rows {
                let status = PhaseStatus::from_str(&status).ok_or_else(|| {
                    EngineError::database(format!("Unknown checkpoint status: {}", status))
                })?;
                checkpoints.push(PhaseCheckpoint {
                    run_id,
                    phase_id,
                    status,
                    progress: serde_json::from_str(&progress)?,
                    created_at,
                });
            }
            Ok(checkpoints)
        })
        .await
        .map_err(|e| EngineError::database(format!("Task join error: {}", e)))?
    }

    /// Load one phase's checkpoint for a run, if present.
    pub async fn load(&self, run_id: &str, phase_id: &str) -> EngineResult<Option<PhaseCheckpoint>> {
        let checkpoints = self.load_for_run(run_id).await?;
        Ok(checkpoints.into_iter().find(|c| c.phase_id == phase_id))
    }

    /// Remove all checkpoints for a run (e.g., after a rollback).
    /// Returns how many were deleted.
    pub async fn delete_run(&self, run_id: &str) -> EngineResult<usize> {
        let pool = self.pool.clone();
        let rid = run_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

            let deleted = conn.execute(
                "DELETE FROM checkpoints WHERE run_id = ?1",
                rusqlite::params![rid],
            )?;
            Ok(deleted)
        })
        .await
        .map_err(|e| EngineError::database(format!("Task join error: {}", e)))?
    }
}
