//! Offline operation queue.
//!
//! Wraps the durable operation log with the state machine and ordering
//! rules: operations against the same path execute strictly in enqueue
//! order and never concurrently; distinct paths run in parallel up to
//! the configured worker limit. Delivery is at least once — a crash
//! between execution and acknowledgment replays the operation, and the
//! transfers are idempotent to absorb that.

use crate::config::SettingsHandle;
use crate::error::{SyncError, SyncResult};
use crate::transfer::{CancelToken, TransferEngine};
use filehaven_store::{OperationStore, StoreResult};
use filehaven_types::{OperationId, OperationStatus, OperationType, PendingOperation};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Outcome counts for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Operations attempted this pass.
    pub attempted: usize,
    /// Operations acknowledged by the server.
    pub completed: usize,
    /// Operations that failed and consumed a retry attempt.
    pub failed: usize,
    /// Operations held without penalty (cancelled or awaiting re-auth).
    pub held: usize,
}

/// Durable queue of pending mutations.
pub struct OperationQueue {
    store: Arc<OperationStore>,
    settings: SettingsHandle,
}

impl OperationQueue {
    /// Creates a queue over the given log.
    #[must_use]
    pub fn new(store: Arc<OperationStore>, settings: SettingsHandle) -> Self {
        Self { store, settings }
    }

    /// Enqueues a new operation after validating its preconditions.
    ///
    /// An upload must name an existing local source file — queueing an
    /// operation that can never execute is a caller bug, not a runtime
    /// failure to retry.
    pub async fn enqueue(&self, op: PendingOperation) -> SyncResult<PendingOperation> {
        if op.op_type == OperationType::Upload {
            let local = op.local_path.as_ref().ok_or_else(|| {
                SyncError::Precondition(format!("upload for {} has no local file", op.file_path))
            })?;
            if !local.exists() {
                return Err(SyncError::Precondition(format!(
                    "upload source does not exist: {}",
                    local.display()
                )));
            }
        }
        if matches!(op.op_type, OperationType::Rename | OperationType::Move)
            && op.destination_path.is_none()
        {
            return Err(SyncError::Precondition(format!(
                "{:?} for {} has no destination",
                op.op_type, op.file_path
            )));
        }

        debug!(op = %op.id, path = %op.file_path, "enqueued {:?}", op.op_type);
        let saved = op.clone();
        self.with_store(move |store| store.save(&op)).await?;
        Ok(saved)
    }

    /// Returns the operations eligible to run now: the earliest
    /// incomplete operation per path, FIFO preserved, filtered by the
    /// per-operation backoff schedule. A path whose head operation has
    /// exhausted its budget is blocked until that operation is retried
    /// manually or dismissed — later operations must not jump the queue.
    pub async fn dispatchable(&self) -> SyncResult<Vec<PendingOperation>> {
        let settings = self.settings.snapshot().await;
        let incomplete = self.with_store(|store| store.load_incomplete()).await?;

        let now = SystemTime::now();
        let mut seen_paths = HashSet::new();
        let mut ready = Vec::new();
        for op in incomplete {
            // Only the head of each path's FIFO is a candidate.
            if !seen_paths.insert(op.file_path.clone()) {
                continue;
            }
            match op.status {
                OperationStatus::Pending | OperationStatus::Retrying => ready.push(op),
                OperationStatus::Failed if op.can_retry() => {
                    if backoff_elapsed(&op, settings.retry_base_delay, settings.retry_period, now) {
                        ready.push(op);
                    }
                }
                // Exhausted head blocks the path.
                _ => {}
            }
        }
        Ok(ready)
    }

    /// Drains the queue once: attempts every dispatchable operation,
    /// batching small uploads and running the rest concurrently across
    /// distinct paths.
    pub async fn drain(
        &self,
        engine: &TransferEngine,
        cancel: &CancelToken,
    ) -> SyncResult<DrainSummary> {
        let settings = self.settings.snapshot().await;
        let ready = self.dispatchable().await?;
        if ready.is_empty() {
            return Ok(DrainSummary::default());
        }
        info!(count = ready.len(), "draining operation queue");

        // Split small uploads out for batching; everything else runs
        // individually.
        let mut batchable = Vec::new();
        let mut individual = Vec::new();
        for op in ready {
            if op.op_type == OperationType::Upload && self.is_small_upload(&op, &settings).await {
                batchable.push(op);
            } else {
                individual.push(op);
            }
        }
        // A batch of one is just overhead.
        if batchable.len() == 1 {
            individual.append(&mut batchable);
        }

        let mut summary = DrainSummary::default();
        if !batchable.is_empty() {
            self.attempt_batch(engine, cancel, batchable, &mut summary)
                .await?;
        }

        let results: Vec<DrainOutcome> = stream::iter(individual)
            .map(|op| self.attempt(engine, cancel, op))
            .buffer_unordered(settings.max_concurrent_transfers.max(1))
            .collect()
            .await;
        for result in results {
            summary.attempted += 1;
            match result? {
                AttemptOutcome::Completed => summary.completed += 1,
                AttemptOutcome::Failed => summary.failed += 1,
                AttemptOutcome::Held => summary.held += 1,
            }
        }
        Ok(summary)
    }

    /// Executes one operation through its full state transition.
    async fn attempt(
        &self,
        engine: &TransferEngine,
        cancel: &CancelToken,
        mut op: PendingOperation,
    ) -> SyncResult<AttemptOutcome> {
        op.begin_attempt();
        self.save(op.clone()).await?;

        let outcome = match engine.execute(&op, cancel).await {
            Ok(()) => {
                op.complete();
                AttemptOutcome::Completed
            }
            Err(e) => self.absorb_failure(&mut op, e),
        };
        self.save(op).await?;
        Ok(outcome)
    }

    /// Executes a group of small uploads as one batched attempt. All
    /// operations in the batch share the attempt's fate.
    async fn attempt_batch(
        &self,
        engine: &TransferEngine,
        cancel: &CancelToken,
        mut ops: Vec<PendingOperation>,
        summary: &mut DrainSummary,
    ) -> SyncResult<()> {
        for op in &mut ops {
            op.begin_attempt();
            self.save(op.clone()).await?;
        }

        match engine.upload_small_batch(&ops, cancel).await {
            Ok(_) => {
                for mut op in ops {
                    op.complete();
                    summary.attempted += 1;
                    summary.completed += 1;
                    self.save(op).await?;
                }
            }
            Err(e) => {
                warn!("batched upload failed: {e}");
                let message = e.to_string();
                let held = matches!(e, SyncError::Cancelled) || e.is_auth();
                let fatal = e.is_fatal();
                for mut op in ops {
                    summary.attempted += 1;
                    if held {
                        op.hold_without_penalty();
                        op.error_message = Some(message.clone());
                        summary.held += 1;
                    } else {
                        if fatal {
                            op.retry_count = op.max_retries;
                        }
                        op.fail(message.clone());
                        summary.failed += 1;
                    }
                    self.save(op).await?;
                }
            }
        }
        Ok(())
    }

    /// Applies the error-class rules from the failure to the record.
    fn absorb_failure(&self, op: &mut PendingOperation, error: SyncError) -> AttemptOutcome {
        match error {
            SyncError::Cancelled => {
                // User cancel: stays Retrying, no budget consumed, the
                // partial transfer state is the next attempt's prefix.
                op.hold_without_penalty();
                AttemptOutcome::Held
            }
            e if e.is_auth() => {
                warn!(path = %op.file_path, "held for re-authentication: {e}");
                op.hold_without_penalty();
                op.error_message = Some(e.to_string());
                AttemptOutcome::Held
            }
            e if e.is_fatal() => {
                warn!(path = %op.file_path, "operation failed permanently: {e}");
                op.retry_count = op.max_retries;
                op.fail(e.to_string());
                AttemptOutcome::Failed
            }
            e => {
                debug!(path = %op.file_path, retry = op.retry_count, "attempt failed: {e}");
                op.fail(e.to_string());
                AttemptOutcome::Failed
            }
        }
    }

    async fn is_small_upload(&self, op: &PendingOperation, settings: &crate::SyncSettings) -> bool {
        match &op.local_path {
            Some(path) => match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len() < settings.chunking_threshold,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Operations parked after exhausting retries.
    pub async fn needs_attention(&self) -> SyncResult<Vec<PendingOperation>> {
        self.with_store(|store| store.needs_attention()).await
    }

    /// Resets a parked operation for another round of attempts.
    pub async fn retry_manually(&self, id: OperationId) -> SyncResult<()> {
        let mut op = self
            .with_store(move |store| store.get(&id))
            .await?
            .ok_or_else(|| SyncError::Precondition(format!("no such operation: {id}")))?;

        op.status = OperationStatus::Pending;
        op.retry_count = 0;
        op.error_message = None;
        self.save(op).await
    }

    /// Dismisses a parked operation permanently.
    pub async fn dismiss(&self, id: OperationId) -> SyncResult<()> {
        self.with_store(move |store| store.remove(&id)).await
    }

    /// Prunes terminal records older than the configured horizon.
    /// Returns the number removed.
    pub async fn prune_terminal(&self) -> SyncResult<usize> {
        let horizon = self.settings.snapshot().await.cleanup_horizon;
        let cutoff = SystemTime::now() - horizon;
        let removed = self
            .with_store(move |store| store.prune_terminal_before(cutoff))
            .await?;
        if removed > 0 {
            info!(removed, "pruned terminal operations");
        }
        Ok(removed)
    }

    async fn save(&self, op: PendingOperation) -> SyncResult<()> {
        self.with_store(move |store| store.save(&op)).await
    }

    async fn with_store<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&OperationStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))?
            .map_err(Into::into)
    }
}

enum AttemptOutcome {
    Completed,
    Failed,
    Held,
}

type DrainOutcome = SyncResult<AttemptOutcome>;

/// Whether enough time has passed since the last attempt. Delay doubles
/// per retry from the base, capped at the scheduler period.
fn backoff_elapsed(
    op: &PendingOperation,
    base: Duration,
    cap: Duration,
    now: SystemTime,
) -> bool {
    let Some(last) = op.last_retry_at else {
        return true;
    };
    let exponent = op.retry_count.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << exponent).min(cap);
    now.duration_since(last).map(|e| e >= delay).unwrap_or(false)
}
