//! Analyzer Cache
//!
//! Content-addressed cache for expensive analyzer outputs, keyed by a
//! SHA-256 over (analyzer_id, document_id) and stored in the
//! `analyzer_cache` SQLite table. Entries carry a ttl; expired entries
//! read as misses and are pruned opportunistically.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use sha2::{Digest, Sha256};

use crate::models::recommendation::Recommendation;
use crate::utils::error::{EngineError, EngineResult};

/// Compute the content-addressed cache key for one analyzer/document pair.
pub fn cache_key(analyzer_id: &str, document_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(analyzer_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(document_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SQLite-backed analyzer output cache.
#[derive(Clone)]
pub struct AnalyzerCache {
    pool: Pool<SqliteConnectionManager>,
}

impl AnalyzerCache {
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> EngineResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))
    }

    /// Look up a cached analyzer output. Expired entries are removed and
    /// reported as misses.
    pub fn get(&self, key: &str) -> EngineResult<Option<Vec<Recommendation>>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT value, created_at, ttl_secs FROM analyzer_cache WHERE key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        );

        let (value, created_at, ttl_secs) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let now = chrono::Utc::now().timestamp();
        if now >= created_at + ttl_secs {
            conn.execute("DELETE FROM analyzer_cache WHERE key = ?1", params![key])?;
            return Ok(None);
        }

        let recommendations: Vec<Recommendation> = serde_json::from_str(&value)?;
        Ok(Some(recommendations))
    }

    /// Store an analyzer output under `key` with the given ttl.
    /// Last writer wins.
    pub fn put(
        &self,
        key: &str,
        recommendations: &[Recommendation],
        ttl_secs: i64,
    ) -> EngineResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO analyzer_cache (key, value, created_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key,
                serde_json::to_string(recommendations)?,
                chrono::Utc::now().timestamp(),
                ttl_secs,
            ],
        )?;
        Ok(())
    }

    /// Remove every expired entry. Returns how many were pruned.
    pub fn prune_expired(&self) -> EngineResult<usize> {
        let conn = self.conn()?;
        let pruned = conn.execute(
            "DELETE FROM analyzer_cache WHERE ?1 >= created_at + ttl_secs",
            params![chrono::Utc::now().timestamp()],
        )?;
        Ok(pruned)
    }

    /// Number of live entries (expired rows included until pruned).
    pub fn len(&self) -> EngineResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM analyzer_cache", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.len()? == 0)
    }
}
