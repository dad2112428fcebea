//! Reconciliation orchestration.
//!
//! The coordinator ties the pieces together: local edits become CRDT
//! bumps plus queued operations, and a reconciliation pass pulls the
//! server's change feed, merges it into the metadata table, routes
//! genuine conflicts to the resolver, drains the queue, and triggers
//! cache eviction. One pass runs at a time; everything it mutates goes
//! through the stores, never through ad-hoc file writes.

use crate::cache::CacheManager;
use crate::config::SettingsHandle;
use crate::conflict::{
    is_genuine_conflict, Conflict, ConflictResolver, ManualChoice, Resolution,
};
use crate::connectivity::ConnectivitySignal;
use crate::error::{SyncError, SyncResult};
use crate::queue::{DrainSummary, OperationQueue};
use crate::remote::{content_hash, ChangeAction, RemoteChange, RemoteEntry, RemoteStore};
use crate::transfer::{materialized_path, CancelToken, TransferEngine};
use filehaven_crdt::{FileMetadata, VectorClock};
use filehaven_store::{MetadataStore, StoreResult};
use filehaven_types::{DeviceId, PendingOperation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote changes applied to the metadata table.
    pub changes_applied: usize,
    /// Genuine concurrent edits detected.
    pub conflicts_detected: usize,
    /// Conflicts deferred for a user decision.
    pub conflicts_deferred: usize,
    /// Queue drain outcome for this pass.
    pub operations: DrainSummary,
    /// Cache files evicted at the end of the pass.
    pub evicted: usize,
}

/// Orchestrates reconciliation passes and records local edits.
pub struct SyncCoordinator {
    device_id: DeviceId,
    remote: Arc<dyn RemoteStore>,
    metadata: Arc<MetadataStore>,
    queue: Arc<OperationQueue>,
    engine: Arc<TransferEngine>,
    resolver: ConflictResolver,
    cache: Arc<CacheManager>,
    connectivity: ConnectivitySignal,
    settings: SettingsHandle,
    cache_dir: PathBuf,
    /// Device clock, persisted through the metadata store.
    clock: RwLock<VectorClock>,
    /// One reconciliation pass at a time.
    sync_lock: Mutex<()>,
}

impl SyncCoordinator {
    /// Creates a coordinator, restoring the device clock from the
    /// metadata store.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        device_id: DeviceId,
        remote: Arc<dyn RemoteStore>,
        metadata: Arc<MetadataStore>,
        queue: Arc<OperationQueue>,
        engine: Arc<TransferEngine>,
        cache: Arc<CacheManager>,
        connectivity: ConnectivitySignal,
        settings: SettingsHandle,
        cache_dir: impl Into<PathBuf>,
    ) -> SyncResult<Self> {
        let store = metadata.clone();
        let clock = tokio::task::spawn_blocking(move || store.load_clock())
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))??;

        Ok(Self {
            resolver: ConflictResolver::new(device_id.clone()),
            device_id,
            remote,
            metadata,
            queue,
            engine,
            cache,
            connectivity,
            settings,
            cache_dir: cache_dir.into(),
            clock: RwLock::new(clock),
            sync_lock: Mutex::new(()),
        })
    }

    /// This device's id.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Current device clock.
    pub async fn clock(&self) -> VectorClock {
        self.clock.read().await.clone()
    }

    /// Subscribes to transfer progress.
    #[must_use]
    pub fn progress(&self) -> tokio::sync::watch::Receiver<crate::transfer::TransferProgress> {
        self.engine.progress()
    }

    // ── Local edits ──────────────────────────────────────────────

    /// Records a local create or edit: bumps the path's record, stamps
    /// this device, advances the clock, and enqueues the upload. The
    /// operation is queued uniformly whether or not the device is
    /// online; the scheduler delivers it.
    pub async fn record_local_edit(
        &self,
        path: &str,
        local_file: &Path,
    ) -> SyncResult<PendingOperation> {
        let bytes = tokio::fs::read(local_file).await.map_err(|e| {
            SyncError::Precondition(format!("local file missing: {}: {e}", local_file.display()))
        })?;
        let hash = content_hash(&bytes);
        let size = bytes.len() as u64;

        let record = match self.load_record(path).await? {
            Some(existing) => {
                let mut next = existing.increment_version(self.device_id.clone());
                next.size = size;
                next.content_hash = Some(hash);
                next.deleted = false;
                next
            }
            None => FileMetadata::new(
                path,
                file_name(path),
                size,
                false,
                self.device_id.clone(),
            )
            .with_hash(hash),
        };
        self.save_record(record).await?;
        self.advance_clock_local().await?;

        let max_retries = self.settings.snapshot().await.max_retries;
        let op = PendingOperation::upload(path, local_file).with_max_retries(max_retries);
        self.queue.enqueue(op).await
    }

    /// Records a local deletion as a tombstoned version plus a queued
    /// delete. The record is never erased.
    pub async fn record_local_delete(&self, path: &str) -> SyncResult<PendingOperation> {
        let existing = self.load_record(path).await?.ok_or_else(|| {
            SyncError::Precondition(format!("cannot delete unknown path: {path}"))
        })?;
        self.save_record(existing.tombstone(self.device_id.clone()))
            .await?;
        self.advance_clock_local().await?;

        let max_retries = self.settings.snapshot().await.max_retries;
        let op = PendingOperation::delete(path).with_max_retries(max_retries);
        self.queue.enqueue(op).await
    }

    /// Records a local rename or move: the destination starts a fresh
    /// record produced by this device, the source is tombstoned, and a
    /// single rename operation carries the change to the server.
    pub async fn record_local_rename(
        &self,
        path: &str,
        new_path: &str,
    ) -> SyncResult<PendingOperation> {
        let source = self.load_record(path).await?.ok_or_else(|| {
            SyncError::Precondition(format!("cannot rename unknown path: {path}"))
        })?;

        let mut destination = FileMetadata::new(
            new_path,
            file_name(new_path),
            source.size,
            source.is_directory,
            self.device_id.clone(),
        );
        destination.content_hash = source.content_hash.clone();
        self.save_record(destination).await?;
        self.save_record(source.tombstone(self.device_id.clone()))
            .await?;
        self.advance_clock_local().await?;

        let max_retries = self.settings.snapshot().await.max_retries;
        let op = PendingOperation::rename(path, new_path).with_max_retries(max_retries);
        self.queue.enqueue(op).await
    }

    /// Records a local folder creation.
    pub async fn record_local_folder(&self, path: &str) -> SyncResult<PendingOperation> {
        if self.load_record(path).await?.is_none() {
            self.save_record(FileMetadata::new(
                path,
                file_name(path),
                0,
                true,
                self.device_id.clone(),
            ))
            .await?;
            self.advance_clock_local().await?;
        }

        let max_retries = self.settings.snapshot().await.max_retries;
        let op = PendingOperation::create_folder(path).with_max_retries(max_retries);
        self.queue.enqueue(op).await
    }

    /// Ensures a path is materialized locally and returns its location.
    /// Downloads (resuming any partial prefix) when the copy is absent.
    pub async fn materialize(&self, path: &str, cancel: &CancelToken) -> SyncResult<PathBuf> {
        let target = materialized_path(&self.cache_dir, path);
        if !target.exists() {
            self.engine.download(path, cancel).await?;
        }
        Ok(target)
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Runs one reconciliation pass with no external cancel signal.
    pub async fn sync_once(&self) -> SyncResult<SyncReport> {
        self.sync_once_with(&CancelToken::never()).await
    }

    /// Runs one reconciliation pass: fetch deltas, merge records,
    /// resolve conflicts, drain the queue, sweep the cache, advance the
    /// checkpoint.
    pub async fn sync_once_with(&self, cancel: &CancelToken) -> SyncResult<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        if !self.remote.is_authenticated() {
            return Err(SyncError::Auth("remote store is not authenticated".into()));
        }

        let store = self.metadata.clone();
        let checkpoint = tokio::task::spawn_blocking(move || store.load_checkpoint())
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))??;

        let change_set = self.remote.get_changes(checkpoint.as_deref()).await?;
        debug!(
            changes = change_set.changes.len(),
            checkpoint = checkpoint.as_deref().unwrap_or("<none>"),
            "reconciliation pass"
        );

        let mut report = SyncReport::default();
        let mut clock = self.clock.read().await.clone();
        for change in &change_set.changes {
            match self.apply_remote_change(change, &mut clock, &mut report).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(path = %change.path, "change skipped: {e}"),
            }
        }
        self.store_clock(clock).await?;

        if self.connectivity.is_online() {
            report.operations = self.queue.drain(&self.engine, cancel).await?;
        }

        if self.cache.needs_sweep().await? {
            report.evicted = self.cache.sweep().await?.evicted;
        }

        if let Some(next) = change_set.next_checkpoint {
            let store = self.metadata.clone();
            tokio::task::spawn_blocking(move || store.save_checkpoint(&next))
                .await
                .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))??;
        }

        info!(
            applied = report.changes_applied,
            conflicts = report.conflicts_detected,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    async fn apply_remote_change(
        &self,
        change: &RemoteChange,
        clock: &mut VectorClock,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        match change.action {
            ChangeAction::Deleted => self.apply_remote_delete(&change.path, report).await,
            ChangeAction::Created | ChangeAction::Modified => {
                let Some(entry) = &change.entry else {
                    warn!(path = %change.path, "change feed entry missing metadata");
                    return Ok(());
                };
                *clock = clock.observe(&entry.device_id, entry.version);
                self.apply_remote_entry(entry, report).await
            }
        }
    }

    async fn apply_remote_delete(&self, path: &str, report: &mut SyncReport) -> SyncResult<()> {
        let Some(local) = self.load_record(path).await? else {
            // Never observed this path; nothing to tombstone.
            return Ok(());
        };
        if !local.deleted {
            let mut tombstone = local.clone();
            tombstone.deleted = true;
            tombstone.version = local.version + 1;
            tombstone.size = 0;
            tombstone.content_hash = None;
            self.save_record(tombstone).await?;
            report.changes_applied += 1;
        }

        // Drop the materialized copy unless a live operation still
        // needs it.
        self.cache.evict_if_unpinned(path).await?;
        Ok(())
    }

    async fn apply_remote_entry(
        &self,
        entry: &RemoteEntry,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let remote_record = record_from_entry(entry);
        let Some(local) = self.load_record(&entry.path).await? else {
            // First observation of the path.
            self.save_record(remote_record).await?;
            report.changes_applied += 1;
            return Ok(());
        };

        if is_genuine_conflict(&local, &remote_record) {
            report.conflicts_detected += 1;
            let policy = self.settings.snapshot().await.conflict_policy;
            let conflict = Conflict {
                path: entry.path.clone(),
                local: local.clone(),
                remote: remote_record,
                detected_at: std::time::SystemTime::now(),
            };
            match self.resolver.resolve(conflict, policy).await? {
                Resolution::Deferred => report.conflicts_deferred += 1,
                resolution => {
                    self.apply_resolution(resolution, report).await?;
                }
            }
            return Ok(());
        }

        if local.should_apply_update(&remote_record) {
            let merged = local.merge(&remote_record)?;
            self.save_record(merged).await?;
            report.changes_applied += 1;
        }
        // A tie-broken-equal or older remote carries nothing new.
        Ok(())
    }

    async fn apply_resolution(
        &self,
        resolution: Resolution,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        match resolution {
            Resolution::ApplyRecord(record) => {
                self.save_record(record).await?;
                report.changes_applied += 1;
            }
            Resolution::UploadLocal(record) => {
                let local_file = materialized_path(&self.cache_dir, &record.path);
                if !local_file.exists() {
                    warn!(
                        path = %record.path,
                        "local copy not materialized; keeping record without corrective upload"
                    );
                    self.save_record(record).await?;
                    return Ok(());
                }
                let path = record.path.clone();
                self.save_record(record).await?;
                let max_retries = self.settings.snapshot().await.max_retries;
                let op = PendingOperation::upload(path, local_file).with_max_retries(max_retries);
                self.queue.enqueue(op).await?;
                report.changes_applied += 1;
            }
            Resolution::Deferred => {}
        }
        Ok(())
    }

    // ── Conflict surfacing ───────────────────────────────────────

    /// Conflicts awaiting a user decision.
    pub async fn pending_conflicts(&self) -> Vec<Conflict> {
        self.resolver.pending().await
    }

    /// Applies a user decision to a deferred conflict. Returns whether
    /// a conflict for the path existed.
    pub async fn resolve_conflict(&self, path: &str, choice: ManualChoice) -> SyncResult<bool> {
        match self.resolver.resolve_manual(path, choice).await? {
            Some(resolution) => {
                let mut report = SyncReport::default();
                self.apply_resolution(resolution, &mut report).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Operations parked after exhausting retries.
    pub async fn needs_attention(&self) -> SyncResult<Vec<PendingOperation>> {
        self.queue.needs_attention().await
    }

    // ── Internals ────────────────────────────────────────────────

    async fn advance_clock_local(&self) -> SyncResult<()> {
        let mut clock = self.clock.write().await;
        let next = clock.increment(&self.device_id);
        *clock = next.clone();
        drop(clock);

        let store = self.metadata.clone();
        tokio::task::spawn_blocking(move || store.save_clock(&next))
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))??;
        Ok(())
    }

    async fn store_clock(&self, merged: VectorClock) -> SyncResult<()> {
        let mut clock = self.clock.write().await;
        let next = clock.merge(&merged);
        *clock = next.clone();
        drop(clock);

        let store = self.metadata.clone();
        tokio::task::spawn_blocking(move || store.save_clock(&next))
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))??;
        Ok(())
    }

    async fn load_record(&self, path: &str) -> SyncResult<Option<FileMetadata>> {
        let store = self.metadata.clone();
        let path = path.to_string();
        self.blocking(move || store.get(&path)).await
    }

    async fn save_record(&self, record: FileMetadata) -> SyncResult<()> {
        let store = self.metadata.clone();
        self.blocking(move || store.save(&record)).await
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))?
            .map_err(Into::into)
    }
}

fn record_from_entry(entry: &RemoteEntry) -> FileMetadata {
    FileMetadata {
        path: entry.path.clone(),
        name: entry.name.clone(),
        size: entry.size,
        is_directory: entry.is_directory,
        modified_at: entry.modified_at,
        version: entry.version,
        device_id: entry.device_id.clone(),
        content_hash: entry.content_hash.clone(),
        deleted: false,
    }
}

fn file_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}
