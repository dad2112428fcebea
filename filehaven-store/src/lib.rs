//! SQLite persistence for the Filehaven sync engine.
//!
//! Everything the core must remember across process restarts lives
//! here, behind repository objects rather than global mutable state:
//!
//! - [`OperationStore`] — the pending-operation log
//! - [`MetadataStore`] — the per-path CRDT table, the device vector
//!   clock, and the reconciliation checkpoint
//! - [`CacheIndex`] — materialized local copies with last-access stamps
//!
//! All stores are synchronous; async callers run them on blocking
//! threads. Each store owns its own connection so the three can be
//! placed in separate files or share one.

mod cache_index;
mod error;
mod metadata_store;
mod operation_store;

pub use cache_index::{CacheEntry, CacheIndex};
pub use error::{StoreError, StoreResult};
pub use metadata_store::MetadataStore;
pub use operation_store::OperationStore;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Millisecond form of a timestamp for storage.
pub(crate) fn to_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Timestamp from its stored millisecond form.
pub(crate) fn from_millis(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}
