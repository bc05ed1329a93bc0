//! Analyzer Boundary
//!
//! Analyzers are black boxes: given a document they return candidate
//! recommendations. The engine wraps every invocation with the
//! content-addressed cache and a retry-with-backoff policy for transient
//! failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::models::recommendation::{Document, Recommendation};
use crate::state::EngineState;
use crate::storage::cache::{cache_key, AnalyzerCache};
use crate::utils::error::{EngineError, EngineResult};

/// A black-box analyzer. How it computes its recommendations is irrelevant
/// to the engine.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Stable analyzer identifier, used for cache keys and attribution.
    fn id(&self) -> &str;

    /// Examine one document and propose recommendations.
    async fn analyze(&self, document: &Document) -> EngineResult<Vec<Recommendation>>;
}

/// Backoff delay for the given 1-based attempt: exponential from the base,
/// capped, with up to half the base added as jitter.
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy
        .base_delay_ms
        .saturating_mul(1u64 << (attempt - 1).min(16));
    let capped = exp.min(policy.max_delay_ms);
    let jitter = if policy.base_delay_ms > 1 {
        rand::thread_rng().gen_range(0..=policy.base_delay_ms / 2)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

/// Invoke one analyzer against one document, consulting the cache first and
/// retrying transient failures with backoff.
///
/// After `policy.max_attempts` failures the last error is returned; the
/// caller decides whether to continue the run with the outputs that
/// succeeded.
pub async fn analyze_with_cache(
    analyzer: &Arc<dyn Analyzer>,
    document: &Document,
    cache: &AnalyzerCache,
    policy: &RetryPolicy,
    cache_ttl_secs: i64,
    state: &EngineState,
) -> EngineResult<Vec<Recommendation>> {
    let key = cache_key(analyzer.id(), &document.document_id);

    if let Some(cached) = cache.get(&key)? {
        debug!(
            analyzer = analyzer.id(),
            document = %document.document_id,
            "analyzer cache hit"
        );
        state
            .cache_hits
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return Ok(cached);
    }
    state
        .cache_misses
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let mut last_error = None;
    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            state
                .analyzer_retries
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let delay = backoff_delay(policy, attempt - 1);
            warn!(
                analyzer = analyzer.id(),
                document = %document.document_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying analyzer after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match analyzer.analyze(document).await {
            Ok(recommendations) => {
                state
                    .analyzer_invocations
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                cache.put(&key, &recommendations, cache_ttl_secs)?;
                return Ok(recommendations);
            }
            Err(e) => {
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        EngineError::analyzer(format!("analyzer {} produced no result", analyzer.id()))
    }))
}
