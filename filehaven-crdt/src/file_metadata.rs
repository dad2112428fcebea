//! Per-path replicated metadata record.
//!
//! Every path a device has ever observed has exactly one record. The
//! record is a last-writer register keyed by a per-path version counter
//! with a deterministic device-id tie-break, which is all the engine
//! needs to answer "which metadata observation is newest" — the server
//! remains authoritative for content itself.
//!
//! Records are never deleted in place. A deletion is a tombstoned
//! version (`deleted = true`) flowing through the operation queue,
//! which prevents a slow replica from resurrecting the path.

use crate::{CrdtError, CrdtResult};
use filehaven_types::DeviceId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::SystemTime;

/// Replicated metadata for a single path.
///
/// `path` is the record's immutable identity. `version` increases by
/// exactly one per local edit; `device_id` names the producer of the
/// current version. `modified_at` is advisory wall-clock only and is
/// never consulted by merge decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Stable identity of the record. Immutable.
    pub path: String,
    /// Display name (final path component).
    pub name: String,
    /// Size in bytes of the current content.
    pub size: u64,
    /// Whether the path is a directory.
    pub is_directory: bool,
    /// Advisory wall-clock modification time. Never used for merges.
    pub modified_at: SystemTime,
    /// Monotonic per-path version counter.
    pub version: u64,
    /// Device that produced this version.
    pub device_id: DeviceId,
    /// Content hash of the version, when known. Divergent hashes at
    /// equal versions are what reveal a genuine concurrent edit.
    pub content_hash: Option<String>,
    /// Tombstone: the path was deleted at this version.
    pub deleted: bool,
}

impl FileMetadata {
    /// Creates the record for a path's first local observation,
    /// starting at version 1.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        size: u64,
        is_directory: bool,
        device_id: DeviceId,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size,
            is_directory,
            modified_at: SystemTime::now(),
            version: 1,
            device_id,
            content_hash: None,
            deleted: false,
        }
    }

    /// Attaches a content hash.
    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Merges two observations of the same path.
    ///
    /// The higher version wins; at equal versions the record produced by
    /// the lexicographically greater device id wins — arbitrary but
    /// globally consistent, so all replicas converge without
    /// coordination. Commutative, associative, and idempotent.
    ///
    /// Fails if the records' paths differ: that is a programming error
    /// in the caller, not a runtime condition.
    pub fn merge(&self, remote: &Self) -> CrdtResult<Self> {
        if self.path != remote.path {
            return Err(CrdtError::PathMismatch {
                local: self.path.clone(),
                remote: remote.path.clone(),
            });
        }

        let winner = match self.version.cmp(&remote.version) {
            Ordering::Greater => self,
            Ordering::Less => remote,
            Ordering::Equal => {
                if remote.device_id > self.device_id {
                    remote
                } else {
                    self
                }
            }
        };
        Ok(winner.clone())
    }

    /// True only if the remote record carries strictly newer
    /// information. A tie-broken-equal remote must not overwrite local
    /// state it adds nothing to.
    #[must_use]
    pub fn should_apply_update(&self, remote: &Self) -> bool {
        remote.version > self.version
    }

    /// Returns the record advanced by one local edit: version + 1, the
    /// editing device stamped as producer, and `modified_at` clamped to
    /// `max(now, previous)` so it never regresses under clock skew.
    #[must_use]
    pub fn increment_version(&self, device_id: DeviceId) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.device_id = device_id;
        next.modified_at = SystemTime::now().max(self.modified_at);
        next
    }

    /// Returns the record advanced by a local deletion: a tombstoned
    /// next version.
    #[must_use]
    pub fn tombstone(&self, device_id: DeviceId) -> Self {
        let mut next = self.increment_version(device_id);
        next.deleted = true;
        next.content_hash = None;
        next.size = 0;
        next
    }
}
