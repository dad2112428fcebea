//! Device-side synchronization engine for Filehaven.
//!
//! Mirrors a user's file store onto devices that may edit files while
//! disconnected from the server and from each other, reconciling the
//! divergence without data loss or silent overwrite.
//!
//! # Architecture
//!
//! - **Remote**: the server behind the [`RemoteStore`] trait, with HTTP
//!   and local-folder implementations
//! - **Transfer**: chunked, resumable byte transport with batching for
//!   small files
//! - **Queue**: durable offline mutation log with per-path FIFO and
//!   at-least-once delivery
//! - **Scheduler**: periodic retry drain gated on connectivity, plus an
//!   immediate drain on reconnect
//! - **Conflict**: policy-driven resolution of genuine concurrent edits
//! - **Cache**: bounded local materialization with pinned-file safety
//! - **Coordinator**: the reconciliation pass tying it all together
//!
//! # Sync Process
//!
//! 1. A local edit bumps the path's CRDT record and enqueues an
//!    idempotent operation
//! 2. The scheduler drains the queue through the transfer engine
//! 3. A reconciliation pass pulls the server's change feed and merges
//!    it into the metadata table
//! 4. Genuine concurrent edits route through the conflict resolver,
//!    which only ever enqueues corrective operations
//! 5. Cache eviction keeps local disk usage bounded

pub mod cache;
pub mod config;
pub mod conflict;
pub mod connectivity;
mod coordinator;
mod error;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod transfer;

pub use cache::{CacheManager, SweepSummary};
pub use config::{SettingsHandle, SyncSettings};
pub use conflict::{
    clocks_concurrent, is_genuine_conflict, Conflict, ConflictPolicy, ConflictResolver,
    ManualChoice, Resolution,
};
pub use connectivity::{ConnectivityMonitor, ConnectivitySignal};
pub use coordinator::{SyncCoordinator, SyncReport};
pub use error::{SyncError, SyncResult};
pub use queue::{DrainSummary, OperationQueue};
pub use remote::{
    content_hash, BatchFile, ByteRange, ChangeAction, ChangeSet, Credentials, HttpRemoteConfig,
    HttpRemoteStore, LocalFolderRemoteStore, RemoteChange, RemoteContent, RemoteEntry,
    RemoteStore, UploadMeta,
};
pub use scheduler::{spawn_cache_sweeps, spawn_cleanup, RetryScheduler};
pub use transfer::{
    materialized_path, partition_batches, CancelHandle, CancelToken, TransferEngine,
    TransferProgress,
};
