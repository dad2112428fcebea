//! Background scheduling.
//!
//! Three loops, all cancellable and all gated the same way: run every
//! period, constrained by a predicate, plus an immediate run on an edge
//! trigger where one exists.
//!
//! - Retry drain: every `retry_period` while online, and immediately on
//!   the offline→online edge so reconnects do not wait out the period.
//! - Cleanup: every `cleanup_period`, prunes terminal operations past
//!   the horizon.
//! - Cache sweep: every `cache_sweep_period`, constrained by the
//!   caller's idle predicate so eviction does not compete with
//!   foreground I/O.

use crate::cache::CacheManager;
use crate::config::SettingsHandle;
use crate::connectivity::ConnectivitySignal;
use crate::queue::OperationQueue;
use crate::transfer::{CancelToken, TransferEngine};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drives the operation queue on a period and on reconnect edges.
pub struct RetryScheduler {
    queue: Arc<OperationQueue>,
    engine: Arc<TransferEngine>,
    connectivity: ConnectivitySignal,
    settings: SettingsHandle,
    cancel: CancelToken,
}

impl RetryScheduler {
    /// Creates a scheduler. The cancel token stops the loop; it is not
    /// forwarded into individual transfers, which get their own.
    #[must_use]
    pub fn new(
        queue: Arc<OperationQueue>,
        engine: Arc<TransferEngine>,
        connectivity: ConnectivitySignal,
        settings: SettingsHandle,
        cancel: CancelToken,
    ) -> Self {
        Self {
            queue,
            engine,
            connectivity,
            settings,
            cancel,
        }
    }

    /// Spawns the scheduler loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until cancelled or the connectivity monitor is dropped.
    pub async fn run(mut self) {
        loop {
            // Re-read the period each cycle so a settings change takes
            // effect without a restart.
            let period = self.settings.snapshot().await.retry_period;
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if self.connectivity.is_online() {
                        self.drain().await;
                    } else {
                        debug!("skipping scheduled drain: offline");
                    }
                }
                state = self.connectivity.changed() => match state {
                    Some(true) => {
                        info!("connectivity restored, draining immediately");
                        self.drain().await;
                    }
                    Some(false) => debug!("connectivity lost"),
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    async fn drain(&self) {
        match self.queue.drain(&self.engine, &self.cancel).await {
            Ok(summary) if summary.attempted > 0 => {
                info!(
                    attempted = summary.attempted,
                    completed = summary.completed,
                    failed = summary.failed,
                    held = summary.held,
                    "drain pass finished"
                );
            }
            Ok(_) => {}
            Err(e) => warn!("drain pass failed: {e}"),
        }
    }
}

/// Spawns the daily cleanup sweep over terminal operations.
pub fn spawn_cleanup(
    queue: Arc<OperationQueue>,
    settings: SettingsHandle,
    cancel: CancelToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let period = settings.snapshot().await.cleanup_period;
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if let Err(e) = queue.prune_terminal().await {
                        warn!("cleanup sweep failed: {e}");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

/// Spawns the periodic cache sweep, constrained by an idle predicate so
/// eviction prefers device-idle windows. A busy tick is skipped, not
/// queued — the next period retries.
pub fn spawn_cache_sweeps(
    cache: Arc<CacheManager>,
    settings: SettingsHandle,
    idle: impl Fn() -> bool + Send + Sync + 'static,
    cancel: CancelToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let period = settings.snapshot().await.cache_sweep_period;
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if !idle() {
                        debug!("skipping cache sweep: device busy");
                        continue;
                    }
                    match cache.needs_sweep().await {
                        Ok(true) => {
                            if let Err(e) = cache.sweep().await {
                                warn!("cache sweep failed: {e}");
                            }
                        }
                        Ok(false) => {}
                        Err(e) => warn!("cache sweep check failed: {e}"),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}
