//! Bounded local cache of materialized files.
//!
//! The engine materializes downloads under one cache directory; this
//! manager keeps that directory within the configured file-count and
//! age bounds. Eviction is oldest-access-first and never touches a
//! file referenced by a pending or retrying operation — evicting an
//! upload's source would turn a retryable failure into data loss.

use crate::config::SettingsHandle;
use crate::error::{SyncError, SyncResult};
use crate::transfer::materialized_path;
use filehaven_store::{CacheIndex, OperationStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// Outcome counts for one eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Files evicted.
    pub evicted: usize,
    /// Files spared because a live operation references them.
    pub pinned: usize,
    /// Files remaining after the sweep.
    pub remaining: usize,
}

/// Bounds local disk usage of materialized files.
pub struct CacheManager {
    index: Arc<CacheIndex>,
    operations: Arc<OperationStore>,
    settings: SettingsHandle,
    cache_dir: PathBuf,
}

impl CacheManager {
    /// Creates a cache manager over the given index and cache root.
    #[must_use]
    pub fn new(
        index: Arc<CacheIndex>,
        operations: Arc<OperationStore>,
        settings: SettingsHandle,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index,
            operations,
            settings,
            cache_dir: cache_dir.into(),
        }
    }

    /// Whether either bound is currently exceeded.
    pub async fn needs_sweep(&self) -> SyncResult<bool> {
        let settings = self.settings.snapshot().await;
        let index = self.index.clone();
        let count = self
            .blocking(move || index.count())
            .await?;
        if count > settings.cache_max_files {
            return Ok(true);
        }

        let cutoff = SystemTime::now() - settings.cache_max_age;
        let index = self.index.clone();
        let over_age = self
            .blocking(move || index.materialized_before(cutoff))
            .await?;
        Ok(!over_age.is_empty())
    }

    /// Evicts until both bounds hold: every over-age file goes, then
    /// the least recently accessed until the count bound is met.
    /// Pinned files are spared in both passes.
    pub async fn sweep(&self) -> SyncResult<SweepSummary> {
        let settings = self.settings.snapshot().await;
        let index = self.index.clone();
        let entries = self.blocking(move || index.oldest_first()).await?;

        let now = SystemTime::now();
        let mut summary = SweepSummary {
            remaining: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            let over_age = now
                .duration_since(entry.materialized_at)
                .map(|age| age > settings.cache_max_age)
                .unwrap_or(false);
            let over_count = summary.remaining > settings.cache_max_files;
            if !over_age && !over_count {
                continue;
            }

            if self.is_pinned(&entry.path).await? {
                debug!(path = %entry.path, "eviction skipped, operation in flight");
                summary.pinned += 1;
                continue;
            }

            self.evict(&entry.path).await?;
            summary.evicted += 1;
            summary.remaining -= 1;
        }

        if summary.evicted > 0 {
            info!(
                evicted = summary.evicted,
                remaining = summary.remaining,
                "cache sweep complete"
            );
        }
        Ok(summary)
    }

    /// Drops one materialized copy (file plus index entry) unless a
    /// live operation pins it. Returns whether it was evicted. Used by
    /// reconciliation when the server reports a deletion.
    pub async fn evict_if_unpinned(&self, path: &str) -> SyncResult<bool> {
        if self.is_pinned(path).await? {
            debug!(path, "eviction skipped, operation in flight");
            return Ok(false);
        }
        self.evict(path).await?;
        Ok(true)
    }

    /// A file referenced by a pending or retrying operation — by its
    /// sync path or by its materialized location — is never evicted.
    async fn is_pinned(&self, path: &str) -> SyncResult<bool> {
        let local = materialized_path(&self.cache_dir, path)
            .to_string_lossy()
            .into_owned();
        let operations = self.operations.clone();
        let path = path.to_string();
        self.blocking(move || {
            Ok(operations.references_path(&path)? || operations.references_path(&local)?)
        })
        .await
    }

    async fn evict(&self, path: &str) -> SyncResult<()> {
        let target = materialized_path(&self.cache_dir, path);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let index = self.index.clone();
        let owned = path.to_string();
        self.blocking(move || index.remove(&owned)).await?;
        debug!(path, "evicted from cache");
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, filehaven_store::StoreError> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))?
            .map_err(Into::into)
    }
}
