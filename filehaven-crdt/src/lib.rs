//! Replicated metadata types for Filehaven.
//!
//! This crate provides the two conflict-free types the sync engine
//! reconciles with:
//!
//! - [`VectorClock`] — per-device logical clocks for causality tracking
//! - [`FileMetadata`] — the per-path replicated metadata record
//!
//! Both merge operations satisfy the CRDT laws:
//! - **Commutative**: merge(a, b) == merge(b, a)
//! - **Associative**: merge(merge(a, b), c) == merge(a, merge(b, c))
//! - **Idempotent**: merge(a, a) == a
//!
//! These properties ensure that replicas converge to the same state
//! regardless of the order in which observations arrive. Only metadata
//! is merged here — the server remains authoritative for file content,
//! so a minimal last-writer register per path is sufficient.

mod file_metadata;
mod vector_clock;

pub use file_metadata::FileMetadata;
pub use vector_clock::{CausalOrder, VectorClock};

/// Result type for CRDT operations.
pub type CrdtResult<T> = Result<T, CrdtError>;

/// Errors that can occur when merging replicated records.
#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    /// Merging records for two different paths is a programming error,
    /// never a runtime condition to recover from.
    #[error("cannot merge records for different paths: {local} vs {remote}")]
    PathMismatch { local: String, remote: String },
}
