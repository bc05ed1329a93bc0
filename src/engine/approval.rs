//! Approval Gate
//!
//! Synchronous human-in-the-loop checkpoint for proposals below the
//! auto-approve threshold (and every DELETE). Each staged request blocks the
//! owning phase on a oneshot channel until a reviewer responds or the
//! timeout elapses; timeouts count as rejections.
//!
//! Resolution arrives two ways: in-process via [`ApprovalGate::resolve`]
//! (tests, embedded reviewers), or out-of-process via the persisted
//! `approval_requests` table the `approve`/`reject` CLI commands update,
//! which the waiting future polls.

use std::collections::HashMap;
use std::time::Duration;

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};

use crate::engine::editor::{ApplyContext, PlanEditor};
use crate::models::proposal::{ApprovalRequest, ApprovalStatus, ModificationProposal};
use crate::models::run::RunError;
use crate::storage::database::DbPool;
use crate::utils::error::{EngineError, EngineResult};

/// Reviewer decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// What a reviewer sees for one staged request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPrompt {
    pub request_id: String,
    pub summary: String,
    pub confidence: f64,
    pub rationale: String,
}

/// Tally of one approval session.
#[derive(Debug, Clone, Default)]
pub struct GateOutcome {
    pub approved_applied: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub errors: Vec<RunError>,
}

const DB_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Central approval gate shared across the orchestrator.
///
/// Thread-safe: all fields use interior mutability and the gate is designed
/// to be wrapped in `Arc`.
pub struct ApprovalGate {
    /// How long one request may wait for a reviewer
    timeout: Duration,
    /// Staged requests not yet presented, by request id
    pending: Mutex<HashMap<String, ApprovalRequest>>,
    /// Oneshot senders that unblock a presented request
    waiters: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
    /// Fully resolved requests, kept for reporting
    resolved: Mutex<Vec<ApprovalRequest>>,
    /// Prompt sink connected by the embedding surface (CLI, tests)
    prompt_tx: RwLock<Option<mpsc::Sender<ApprovalPrompt>>>,
    /// Optional persistence so external processes can resolve requests
    pool: Option<DbPool>,
}

impl ApprovalGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            resolved: Mutex::new(Vec::new()),
            prompt_tx: RwLock::new(None),
            pool: None,
        }
    }

    /// Persist staged requests so `approve <id>` / `reject <id>` can resolve
    /// them from another invocation.
    pub fn with_persistence(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Connect the prompt sink reviewers read from.
    pub async fn set_prompt_tx(&self, tx: mpsc::Sender<ApprovalPrompt>) {
        *self.prompt_tx.write().await = Some(tx);
    }

    /// Disconnect the prompt sink (e.g., when a run ends).
    pub async fn clear_prompt_tx(&self) {
        *self.prompt_tx.write().await = None;
    }

    /// Stage a proposal for review. Returns the request id.
    pub async fn stage(&self, proposal: ModificationProposal) -> EngineResult<String> {
        let request = ApprovalRequest::new(proposal, chrono::Utc::now().to_rfc3339());
        let request_id = request.request_id.clone();

        if let Some(pool) = &self.pool {
            let conn = pool
                .get()
                .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;
            conn.execute(
                "INSERT INTO approval_requests
                    (request_id, run_id, proposal, confidence, status, requested_at)
                 VALUES (?1, NULL, ?2, ?3, ?4, ?5)",
                params![
                    request.request_id,
                    serde_json::to_string(&request.proposal)?,
                    request.proposal.confidence,
                    request.status.to_string(),
                    request.requested_at,
                ],
            )?;
        }

        info!(
            request_id = %request_id,
            summary = %request.proposal.summary(),
            "proposal staged for approval"
        );
        self.pending.lock().await.insert(request_id.clone(), request);
        Ok(request_id)
    }

    /// Requests still awaiting review, most impactful first: confidence
    /// descending, ties broken by request id for a stable session order.
    pub async fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let pending = self.pending.lock().await;
        let mut requests: Vec<ApprovalRequest> = pending.values().cloned().collect();
        requests.sort_by(|a, b| {
            b.proposal
                .confidence
                .partial_cmp(&a.proposal.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        requests
    }

    /// Requests resolved so far (approved, rejected, or timed out).
    pub async fn resolved_requests(&self) -> Vec<ApprovalRequest> {
        self.resolved.lock().await.clone()
    }

    /// Resolve a presented request in-process. Returns false when the id is
    /// unknown or the request is no longer waiting.
    pub async fn resolve(&self, request_id: &str, decision: ApprovalDecision) -> bool {
        let mut waiters = self.waiters.lock().await;
        if let Some(tx) = waiters.remove(request_id) {
            tx.send(decision).is_ok()
        } else {
            false
        }
    }

    /// Update a persisted request's status from another process. Used by the
    /// `approve`/`reject` CLI commands; the waiting future observes the row.
    pub fn resolve_persisted(
        pool: &DbPool,
        request_id: &str,
        decision: ApprovalDecision,
    ) -> EngineResult<()> {
        let status = match decision {
            ApprovalDecision::Approve => ApprovalStatus::Approved,
            ApprovalDecision::Reject => ApprovalStatus::Rejected,
        };
        let conn = pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;
        let updated = conn.execute(
            "UPDATE approval_requests
             SET status = ?2, resolved_at = ?3
             WHERE request_id = ?1 AND status = 'pending'",
            params![
                request_id,
                status.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        if updated == 0 {
            return Err(EngineError::not_found(format!(
                "No pending approval request: {}",
                request_id
            )));
        }
        Ok(())
    }

    /// Persisted requests still pending, most impactful first. Used by the
    /// `pending` CLI command.
    pub fn pending_persisted(pool: &DbPool) -> EngineResult<Vec<ApprovalRequest>> {
        let conn = pool
            .get()
            .map_err(|e| EngineError::database(format!("Failed to get connection: {}", e)))?;
        let mut stmt = conn.prepare(
            "SELECT request_id, proposal, status, requested_at, resolved_at
             FROM approval_requests WHERE status = 'pending'
             ORDER BY confidence DESC, request_id",
        )?;

        let rows: Vec<(String, String, String, String, Option<String>)> = stmt
            .query_map([], |row| {
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

        let mut requests = Vec::with_capacity(rows.len());
        for (request_id, proposal, status, requested_at, resolved_at) in rows {
            let status = ApprovalStatus::from_str(&status)
                .ok_or_else(|| EngineError::database(format!("Unknown approval status: {}", status)))?;
            requests.push(ApprovalRequest {
                request_id,
                proposal: serde_json::from_str(&proposal)?,
                status,
                requested_at,
                resolved_at,
            });
        }
        Ok(requests)
    }

    /// Read a persisted request's status, if the gate has persistence.
    fn persisted_status(&self, request_id: &str) -> Option<ApprovalStatus> {
        let pool = self.pool.as_ref()?;
        let conn = pool.get().ok()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM approval_requests WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .ok();
        status.and_then(|s| ApprovalStatus::from_str(&s))
    }

    fn persist_resolution(&self, request: &ApprovalRequest) {
        let Some(pool) = &self.pool else { return };
        let Ok(conn) = pool.get() else { return };
        let _ = conn.execute(
            "UPDATE approval_requests SET status = ?2, resolved_at = ?3 WHERE request_id = ?1",
            params![
                request.request_id,
                request.status.to_string(),
                request.resolved_at,
            ],
        );
    }

    /// Present one request and block until a decision or timeout.
    async fn await_decision(&self, request: &ApprovalRequest) -> ApprovalStatus {
        let (tx, rx) = oneshot::channel::<ApprovalDecision>();
        self.waiters
            .lock()
            .await
            .insert(request.request_id.clone(), tx);

        // Publish the prompt; a missing sink is fine, the request can still
        // be resolved programmatically or through the persisted row.
        {
            let prompt_tx = self.prompt_tx.read().await;
            if let Some(sink) = prompt_tx.as_ref() {
                let prompt = ApprovalPrompt {
                    request_id: request.request_id.clone(),
                    summary: request.proposal.summary(),
                    confidence: request.proposal.confidence,
                    rationale: request.proposal.rationale.clone(),
                };
                let _ = sink.send(prompt).await;
            }
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut rx = rx;
        let status = loop {
            let poll_sleep = tokio::time::sleep(DB_POLL_INTERVAL);
            tokio::select! {
                decision = &mut rx => {
                    match decision {
                        Ok(ApprovalDecision::Approve) => break ApprovalStatus::Approved,
                        Ok(ApprovalDecision::Reject) => break ApprovalStatus::Rejected,
                        // Sender dropped without answering
                        Err(_) => break ApprovalStatus::TimedOut,
                    }
                }
                _ = poll_sleep => {
                    match self.persisted_status(&request.request_id) {
                        Some(ApprovalStatus::Approved) => break ApprovalStatus::Approved,
                        Some(ApprovalStatus::Rejected) => break ApprovalStatus::Rejected,
                        _ => {}
                    }
                    if tokio::time::Instant::now() >= deadline {
                        break ApprovalStatus::TimedOut;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    break ApprovalStatus::TimedOut;
                }
            }
        };

        self.waiters.lock().await.remove(&request.request_id);
        status
    }

    /// Process every staged request in stable order: present, wait, and on
    /// approval re-submit to the editor with the confidence check overridden
    /// for that single proposal. Rejected and timed-out requests are
    /// discarded and logged.
    pub async fn process_pending(
        &self,
        editor: &PlanEditor,
        ctx: &ApplyContext,
    ) -> EngineResult<GateOutcome> {
        let mut outcome = GateOutcome::default();

        loop {
            // Re-sort every iteration so a reviewer quitting early still
            // resolved the most impactful requests first.
            let next = {
                let ordered = self.pending_requests().await;
                match ordered.into_iter().next() {
                    Some(request) => request,
                    None => break,
                }
            };
            self.pending.lock().await.remove(&next.request_id);

            let status = self.await_decision(&next).await;
            let mut resolved = next.clone();
            resolved.status = status;
            resolved.resolved_at = Some(chrono::Utc::now().to_rfc3339());
            self.persist_resolution(&resolved);

            match status {
                ApprovalStatus::Approved => {
                    let approved_ctx = ctx.with_override();
                    match editor.apply(&resolved.proposal, &approved_ctx).await {
                        Ok(apply) if apply.applied => outcome.approved_applied += 1,
                        Ok(apply) => {
                            if let Some(error) = apply.error {
                                outcome.errors.push(RunError::new(ctx.phase_id.clone(), error));
                            }
                        }
                        Err(e) => {
                            outcome
                                .errors
                                .push(RunError::new(ctx.phase_id.clone(), e.to_string()));
                        }
                    }
                }
                ApprovalStatus::Rejected => {
                    info!(request_id = %resolved.request_id, "approval request rejected");
                    outcome.rejected += 1;
                }
                ApprovalStatus::TimedOut => {
                    warn!(
                        request_id = %resolved.request_id,
                        "approval request timed out; treating as rejected"
                    );
                    outcome.timed_out += 1;
                }
                ApprovalStatus::Pending => unreachable!("await_decision always resolves"),
            }

            self.resolved.lock().await.push(resolved);
        }

        Ok(outcome)
    }

    /// Number of requests still staged.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
