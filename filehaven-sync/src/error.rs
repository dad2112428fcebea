//! Error types for the sync engine.
//!
//! Every network and storage failure is converted into a `SyncError` at
//! the transfer boundary; the scheduler only ever sees typed results,
//! so no transport failure can corrupt the queue. The classification
//! predicates drive retry policy: transient errors consume an attempt,
//! auth errors and cancellation hold the operation without penalty, and
//! precondition violations park it immediately.

use filehaven_crdt::CrdtError;
use filehaven_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error (connection reset, DNS, server error).
    #[error("network error: {0}")]
    Network(String),

    /// Operation exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// The remote rejected our credentials or token.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Remote path does not exist.
    #[error("remote path not found: {0}")]
    NotFound(String),

    /// Concurrent versions of a path diverge; routed to the resolver.
    #[error("conflict on {path}: concurrent versions diverge")]
    Conflict { path: String },

    /// Caller bug: queueing an upload without a source file, merging
    /// mismatched paths, and the like. Never retried.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The caller cancelled the operation. Not a failure.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Merge error from the CRDT layer.
    #[error("merge error: {0}")]
    Crdt(#[from] CrdtError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine task failure (blocking pool panic, channel loss).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Transient transport failures: retried by the scheduler, never
    /// treated as data loss.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// Authentication failures: held for external re-auth without
    /// consuming a retry attempt.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Programming errors: parked immediately, never retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Precondition(_) | Self::Crdt(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}
