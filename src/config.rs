//! Engine Configuration
//!
//! All tunable thresholds and policies in one serde-backed struct, loadable
//! from a JSON file with per-field defaults. Thresholds are configuration,
//! never hard-coded at call sites.

use std::path::Path;

use serde::{Deserialize, Serialize};

use plan_consensus_similarity::ScorerKind;

use crate::utils::error::{EngineError, EngineResult};

/// Retry policy for transient analyzer failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts before giving up (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Similarity threshold for clustering recommendations
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Coverage threshold for gap/obsolescence detection
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    /// Similarity threshold for duplicate plan detection
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    /// Proposals at or above this confidence apply without approval
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold: f64,
    /// Upper bound on the confidence of DELETE proposals
    #[serde(default = "default_obsolescence_confidence_cap")]
    pub obsolescence_confidence_cap: f64,
    /// Similarity metric used by clustering and detection
    #[serde(default)]
    pub scorer: ScorerKind,
    /// Worker pool width for independent phases
    #[serde(default = "default_max_parallel_phases")]
    pub max_parallel_phases: usize,
    /// Seconds a staged proposal waits for a human before timing out
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Seconds an analyzer cache entry stays fresh
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: i64,
    /// Retry policy for transient analyzer failures
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_coverage_threshold() -> f64 {
    0.5
}

fn default_duplicate_threshold() -> f64 {
    0.85
}

fn default_auto_approve_threshold() -> f64 {
    0.85
}

fn default_obsolescence_confidence_cap() -> f64 {
    0.6
}

fn default_max_parallel_phases() -> usize {
    4
}

fn default_approval_timeout_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> i64 {
    7 * 24 * 3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            coverage_threshold: default_coverage_threshold(),
            duplicate_threshold: default_duplicate_threshold(),
            auto_approve_threshold: default_auto_approve_threshold(),
            obsolescence_confidence_cap: default_obsolescence_confidence_cap(),
            scorer: ScorerKind::default(),
            max_parallel_phases: default_max_parallel_phases(),
            approval_timeout_secs: default_approval_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load from the given path, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Save the current configuration to a JSON file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject thresholds outside [0, 1] and zero-size pools.
    pub fn validate(&self) -> EngineResult<()> {
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("coverage_threshold", self.coverage_threshold),
            ("duplicate_threshold", self.duplicate_threshold),
            ("auto_approve_threshold", self.auto_approve_threshold),
            (
                "obsolescence_confidence_cap",
                self.obsolescence_confidence_cap,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.max_parallel_phases == 0 {
            return Err(EngineError::config("max_parallel_phases must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}
