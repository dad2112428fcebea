//! Engine configuration.
//!
//! All knobs are hot-reloadable: components read a fresh snapshot from
//! the shared [`SettingsHandle`] at each decision point, so an update
//! takes effect on the next scheduler pass, batch, or sweep without a
//! restart.

use crate::conflict::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Tunable settings for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Files at or above this size stream individually; smaller files
    /// are batched.
    pub chunking_threshold: u64,
    /// Maximum number of small files in one batched upload.
    pub batch_max_files: usize,
    /// Maximum total bytes in one batched upload.
    pub batch_max_bytes: u64,
    /// How often the retry scheduler drains the queue.
    pub retry_period: Duration,
    /// Base delay for per-operation retry backoff (doubled per attempt,
    /// capped at `retry_period`).
    pub retry_base_delay: Duration,
    /// Attempts allowed per operation before it is parked.
    pub max_retries: u32,
    /// Terminal operations older than this are pruned.
    pub cleanup_horizon: Duration,
    /// How often the cleanup sweep runs.
    pub cleanup_period: Duration,
    /// Maximum number of materialized files before eviction.
    pub cache_max_files: usize,
    /// Maximum materialization age before eviction.
    pub cache_max_age: Duration,
    /// How often the cache sweep runs.
    pub cache_sweep_period: Duration,
    /// How concurrent conflicts are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Maximum operations in flight at once (across distinct paths).
    pub max_concurrent_transfers: usize,
    /// TCP connect timeout for remote calls.
    pub connect_timeout: Duration,
    /// Per-request read timeout for remote calls.
    pub read_timeout: Duration,
    /// Overall ceiling for a single large transfer.
    pub transfer_ceiling: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunking_threshold: 4 * 1024 * 1024, // 4 MiB
            batch_max_files: 16,
            batch_max_bytes: 8 * 1024 * 1024, // 8 MiB
            retry_period: Duration::from_secs(15 * 60),
            retry_base_delay: Duration::from_secs(30),
            max_retries: 3,
            cleanup_horizon: Duration::from_secs(7 * 24 * 3600),
            cleanup_period: Duration::from_secs(24 * 3600),
            cache_max_files: 500,
            cache_max_age: Duration::from_secs(7 * 24 * 3600),
            cache_sweep_period: Duration::from_secs(3600),
            conflict_policy: ConflictPolicy::KeepNewest,
            max_concurrent_transfers: 4,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            transfer_ceiling: Duration::from_secs(30 * 60),
        }
    }
}

/// Shared handle to the live settings.
///
/// Cloning is cheap; every clone observes updates immediately.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<SyncSettings>>,
}

impl SettingsHandle {
    /// Creates a handle with the given initial settings.
    #[must_use]
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Returns a point-in-time copy of the settings.
    pub async fn snapshot(&self) -> SyncSettings {
        self.inner.read().await.clone()
    }

    /// Applies an update in place. Takes effect on the next read.
    pub async fn update(&self, apply: impl FnOnce(&mut SyncSettings)) {
        let mut guard = self.inner.write().await;
        apply(&mut guard);
    }

    /// Replaces the settings wholesale (e.g. a reloaded config file).
    pub async fn replace(&self, settings: SyncSettings) {
        *self.inner.write().await = settings;
    }
}
