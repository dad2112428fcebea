//! Pending-operation records for the offline mutation queue.
//!
//! A `PendingOperation` is the durable unit of intent: every local
//! mutation is recorded as one, whether or not the device is online,
//! and the retry scheduler drains them with at-least-once semantics.
//! The underlying transfers must therefore be idempotent (uploads
//! overwrite, folder creation dedups by path).

use crate::OperationId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Default number of attempts before an operation is parked as failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The kind of mutation a pending operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Upload local content to the remote path.
    Upload,
    /// Delete the remote path.
    Delete,
    /// Rename the remote path in place.
    Rename,
    /// Move the remote path to a new parent.
    Move,
    /// Create a remote folder.
    CreateFolder,
}

impl OperationType {
    /// Stable string form used by the durable store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Move => "move",
            Self::CreateFolder => "create_folder",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "delete" => Some(Self::Delete),
            "rename" => Some(Self::Rename),
            "move" => Some(Self::Move),
            "create_folder" => Some(Self::CreateFolder),
            _ => None,
        }
    }
}

/// Lifecycle status of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Enqueued, never attempted.
    Pending,
    /// An attempt is in flight, or the operation is held awaiting
    /// re-authentication / the next scheduler pass after a cancel.
    Retrying,
    /// The last attempt failed. Retryable while budget remains.
    Failed,
    /// Acknowledged by the server. Immutable until pruned.
    Completed,
}

impl OperationStatus {
    /// Stable string form used by the durable store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A durable record of a mutation that has not yet been accepted by the
/// server.
///
/// State machine: `Pending → Retrying → Completed`, or
/// `Retrying → Failed → Retrying` while retry budget remains. An
/// operation whose budget is exhausted stays `Failed` with
/// `can_retry() == false` and is surfaced for manual attention, never
/// silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique identifier for this operation.
    pub id: OperationId,
    /// The kind of mutation.
    pub op_type: OperationType,
    /// The remote path this operation targets.
    pub file_path: String,
    /// Local source file, for uploads.
    pub local_path: Option<PathBuf>,
    /// Destination path, for rename/move.
    pub destination_path: Option<String>,
    /// Opaque payload for operation kinds that need extra context.
    pub payload: Option<String>,
    /// Current lifecycle status.
    pub status: OperationStatus,
    /// Number of attempts made so far.
    pub retry_count: u32,
    /// Attempts allowed before the operation is parked.
    pub max_retries: u32,
    /// Error text from the most recent failed attempt.
    pub error_message: Option<String>,
    /// When the operation was enqueued.
    pub created_at: SystemTime,
    /// When the most recent attempt started.
    pub last_retry_at: Option<SystemTime>,
    /// When the server acknowledged the operation.
    pub completed_at: Option<SystemTime>,
}

impl PendingOperation {
    /// Creates a new pending operation.
    #[must_use]
    pub fn new(op_type: OperationType, file_path: impl Into<String>) -> Self {
        Self {
            id: OperationId::new(),
            op_type,
            file_path: file_path.into(),
            local_path: None,
            destination_path: None,
            payload: None,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            created_at: SystemTime::now(),
            last_retry_at: None,
            completed_at: None,
        }
    }

    /// Creates an upload operation for a local file.
    #[must_use]
    pub fn upload(file_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        let mut op = Self::new(OperationType::Upload, file_path);
        op.local_path = Some(local_path.into());
        op
    }

    /// Creates a delete operation.
    #[must_use]
    pub fn delete(file_path: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, file_path)
    }

    /// Creates a rename operation.
    #[must_use]
    pub fn rename(file_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        let mut op = Self::new(OperationType::Rename, file_path);
        op.destination_path = Some(new_path.into());
        op
    }

    /// Creates a move operation.
    #[must_use]
    pub fn move_to(file_path: impl Into<String>, destination: impl Into<String>) -> Self {
        let mut op = Self::new(OperationType::Move, file_path);
        op.destination_path = Some(destination.into());
        op
    }

    /// Creates a folder-creation operation.
    #[must_use]
    pub fn create_folder(file_path: impl Into<String>) -> Self {
        Self::new(OperationType::CreateFolder, file_path)
    }

    /// Overrides the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// True iff the operation failed and retry budget remains.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.status == OperationStatus::Failed && self.retry_count < self.max_retries
    }

    /// True once the operation has reached a state the cleanup sweep may
    /// prune: completed, or failed with no budget left.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self.status {
            OperationStatus::Completed => true,
            OperationStatus::Failed => self.retry_count >= self.max_retries,
            _ => false,
        }
    }

    /// Marks the start of an attempt: consumes one unit of retry budget
    /// and stamps `last_retry_at` before the transfer is invoked.
    pub fn begin_attempt(&mut self) {
        self.status = OperationStatus::Retrying;
        self.retry_count += 1;
        self.last_retry_at = Some(SystemTime::now());
    }

    /// Marks the attempt successful.
    pub fn complete(&mut self) {
        self.status = OperationStatus::Completed;
        self.error_message = None;
        self.completed_at = Some(SystemTime::now());
    }

    /// Marks the attempt failed, capturing the error text.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.error_message = Some(message.into());
    }

    /// Rolls back an attempt that must not count against the retry
    /// budget: a user-initiated cancel, or an authentication failure
    /// held for external re-auth. The operation stays `Retrying` so the
    /// next scheduler pass picks it up.
    pub fn hold_without_penalty(&mut self) {
        self.status = OperationStatus::Retrying;
        self.retry_count = self.retry_count.saturating_sub(1);
    }
}
