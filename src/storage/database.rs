//! SQLite Database
//!
//! Embedded database for persistent storage using rusqlite with r2d2
//! connection pooling. Owns schema initialization and the run-history
//! table; plans, journal, cache, and checkpoints have dedicated stores
//! that share this pool.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::models::run::{RunResult, RunStatus};
use crate::utils::error::{EngineError, EngineResult};
use crate::utils::paths::database_path;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Raw run-history row from the database
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: String,
    pub status: String,
    pub phases_completed: i64,
    pub proposals_applied: i64,
    pub proposals_pending: i64,
    pub report: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// A resumable run discovered in the history table
#[derive(Debug, Clone)]
pub struct IncompleteRun {
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub checkpoint_count: i64,
}

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool) -> EngineResult<Self> {
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// Pool size is pinned to 1 so every connection sees the same
    /// in-memory database.
    pub fn new_in_memory() -> EngineResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| EngineError::database(format!("Failed to create connection pool: {}", e)))?;
        Self::from_pool(pool)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| EngineError::database(format!("Failed to create connection pool: {}", e)))?;
        Self::from_pool(pool)
    }

    /// Open the database at the default data-dir location.
    pub fn open_default() -> EngineResult<Self> {
        Self::open_at(database_path()?)
    }

    /// Get a clone of the underlying pool for dedicated stores.
    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    /// Initialize the database schema
    fn init_schema(&self) -> EngineResult<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plans (
                plan_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                priority TEXT NOT NULL,
                version INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                source_recommendation_ids TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plans_status ON plans(status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plan_journal (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                phase_id TEXT,
                proposal TEXT NOT NULL,
                prior_state TEXT NOT NULL,
                new_state TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plan_journal_run
             ON plan_journal(run_id, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS analyzer_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT NOT NULL,
                phase_id TEXT NOT NULL,
                status TEXT NOT NULL,
                progress TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, phase_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS approval_requests (
                request_id TEXT PRIMARY KEY,
                run_id TEXT,
                proposal TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                resolved_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                phases_completed INTEGER NOT NULL DEFAULT 0,
                proposals_applied INTEGER NOT NULL DEFAULT 0,
                proposals_pending INTEGER NOT NULL DEFAULT 0,
                report TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            )",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // Run history
    // ========================================================================

    /// Record a run as started. Re-registering an existing run (a resume)
    /// flips its status back to running.
    pub fn register_run(&self, run_id: &str) -> EngineResult<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

        conn.execute(
            "INSERT INTO runs (run_id, status, started_at)
             VALUES (?1, 'running', ?2)
             ON CONFLICT(run_id) DO UPDATE SET status = 'running', finished_at = NULL",
            params![run_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Store the terminal result and report of a run.
    pub fn finish_run(&self, result: &RunResult, report_json: &str) -> EngineResult<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

        conn.execute(
            "UPDATE runs SET
                status = ?2,
                phases_completed = ?3,
                proposals_applied = ?4,
                proposals_pending = ?5,
                report = ?6,
                finished_at = ?7
             WHERE run_id = ?1",
            params![
                result.run_id,
                result.status.to_string(),
                result.phases_completed as i64,
                result.proposals_applied as i64,
                result.proposals_pending_approval as i64,
                report_json,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch one run-history row.
    pub fn get_run(&self, run_id: &str) -> EngineResult<Option<RunRow>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

        let result = conn.query_row(
            "SELECT run_id, status, phases_completed, proposals_applied,
                    proposals_pending, report, started_at, finished_at
             FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| {
                Ok(RunRow {
                    run_id: row.get(0)?,
                    status: row.get(1)?,
                    phases_completed: row.get(2)?,
                    proposals_applied: row.get(3)?,
                    proposals_pending: row.get(4)?,
                    report: row.get(5)?,
                    started_at: row.get(6)?,
                    finished_at: row.get(7)?,
                })
            },
        );

        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs whose status never reached a terminal state, newest first,
    /// enriched with their checkpoint counts for resumability display.
    pub fn incomplete_runs(&self) -> EngineResult<Vec<IncompleteRun>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;

        let mut stmt = conn.prepare(
            "SELECT r.run_id, r.status, r.started_at,
                    (SELECT COUNT(*) FROM checkpoints c WHERE c.run_id = r.run_id)
             FROM runs r
             WHERE r.status = ?1
             ORDER BY r.started_at DESC",
        )?;

        let rows = stmt
            .query_map(params![RunStatus::Running.to_string()], |row| {
                Ok(IncompleteRun {
                    run_id: row.get(0)?,
                    status: row.get(1)?,
                    started_at: row.get(2)?,
                    checkpoint_count: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }
}
