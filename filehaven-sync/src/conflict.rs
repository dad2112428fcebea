//! Conflict detection and resolution policy.
//!
//! The resolver is consulted only when reconciliation reveals a genuine
//! concurrent edit — vector clocks concurrent, or equal record versions
//! whose content hashes diverge. A plain catch-up (one side strictly
//! newer) never reaches it.
//!
//! Resolutions never touch files directly: every decision is expressed
//! as a record to apply or a corrective operation to enqueue, so the
//! correction gets the same retry and failure handling as an organic
//! edit.

use crate::error::SyncResult;
use filehaven_crdt::{FileMetadata, VectorClock};
use filehaven_types::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// How concurrent edits are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Defer to the CRDT merge winner.
    KeepNewest,
    /// This device's record wins, regardless of version.
    KeepLocal,
    /// The server's record wins, regardless of version.
    KeepServer,
    /// Surface the pair and wait for an external decision.
    AskUser,
}

/// A detected concurrent edit, surfaced while awaiting resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The contested path.
    pub path: String,
    /// This device's record.
    pub local: FileMetadata,
    /// The server's record.
    pub remote: FileMetadata,
    /// When the divergence was noticed.
    pub detected_at: SystemTime,
}

/// What the coordinator should do about a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Persist this record as the path's state.
    ApplyRecord(FileMetadata),
    /// Persist this record and enqueue a corrective upload of the
    /// local copy stamped with it.
    UploadLocal(FileMetadata),
    /// No action until an external decision arrives.
    Deferred,
}

/// The decision an external party supplies for a deferred conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualChoice {
    /// Keep this device's copy.
    KeepLocal,
    /// Keep the server's copy.
    KeepServer,
}

/// Applies the configured policy to detected conflicts.
pub struct ConflictResolver {
    device_id: DeviceId,
    /// Conflicts deferred under `AskUser`, oldest first.
    pending: Arc<RwLock<VecDeque<Conflict>>>,
}

/// True when the two records represent a genuine concurrent edit
/// rather than a catch-up: equal versions from different devices whose
/// content hashes diverge. Hashes unknown on either side count as
/// divergent — the engine cannot prove the contents equal.
#[must_use]
pub fn is_genuine_conflict(local: &FileMetadata, remote: &FileMetadata) -> bool {
    if local.path != remote.path {
        return false;
    }
    if local.version != remote.version || local.device_id == remote.device_id {
        return false;
    }
    match (&local.content_hash, &remote.content_hash) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

/// True when two device clocks prove the edits were concurrent.
#[must_use]
pub fn clocks_concurrent(local: &VectorClock, remote: &VectorClock) -> bool {
    local.is_concurrent_with(remote)
}

impl ConflictResolver {
    /// Creates a resolver for this device.
    #[must_use]
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            pending: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Resolves a conflict under the given policy.
    pub async fn resolve(&self, conflict: Conflict, policy: ConflictPolicy) -> SyncResult<Resolution> {
        debug!(
            path = %conflict.path,
            local_version = conflict.local.version,
            remote_version = conflict.remote.version,
            ?policy,
            "resolving conflict"
        );
        match policy {
            ConflictPolicy::KeepNewest => {
                let winner = conflict.local.merge(&conflict.remote)?;
                Ok(Resolution::ApplyRecord(winner))
            }
            ConflictPolicy::KeepLocal => Ok(self.keep_local(&conflict)),
            ConflictPolicy::KeepServer => Ok(Resolution::ApplyRecord(conflict.remote)),
            ConflictPolicy::AskUser => {
                info!(path = %conflict.path, "conflict deferred for user decision");
                self.pending.write().await.push_back(conflict);
                Ok(Resolution::Deferred)
            }
        }
    }

    /// Conflicts awaiting an external decision, oldest first.
    pub async fn pending(&self) -> Vec<Conflict> {
        self.pending.read().await.iter().cloned().collect()
    }

    /// Applies an external decision to a deferred conflict. Returns
    /// `None` if no deferred conflict exists for the path.
    pub async fn resolve_manual(
        &self,
        path: &str,
        choice: ManualChoice,
    ) -> SyncResult<Option<Resolution>> {
        let conflict = {
            let mut pending = self.pending.write().await;
            let index = pending.iter().position(|c| c.path == path);
            match index {
                Some(index) => pending.remove(index),
                None => None,
            }
        };
        let Some(conflict) = conflict else {
            return Ok(None);
        };

        let resolution = match choice {
            ManualChoice::KeepLocal => self.keep_local(&conflict),
            ManualChoice::KeepServer => Resolution::ApplyRecord(conflict.remote),
        };
        Ok(Some(resolution))
    }

    /// Local override: advance past both records so every replica —
    /// including the concurrent editor — converges on our copy.
    fn keep_local(&self, conflict: &Conflict) -> Resolution {
        let mut corrected = conflict.local.increment_version(self.device_id.clone());
        corrected.version = corrected
            .version
            .max(conflict.remote.version + 1);
        Resolution::UploadLocal(corrected)
    }
}
