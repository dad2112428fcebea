//! Remote store abstraction.
//!
//! The central server is an opaque collaborator behind the
//! [`RemoteStore`] trait, so the same engine runs unmodified on the
//! mobile and desktop clients with whatever transport each platform
//! provides.

pub mod http;
pub mod local;

use crate::error::SyncResult;
use async_trait::async_trait;
use filehaven_types::DeviceId;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub use http::{HttpRemoteConfig, HttpRemoteStore};
pub use local::LocalFolderRemoteStore;

/// Credentials presented to [`RemoteStore::authenticate`]. Token
/// lifecycle and refresh are the platform shell's problem, not the
/// engine's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Account identifier.
    pub account: String,
    /// Account secret or pre-issued refresh material.
    pub secret: String,
}

/// Metadata for one file as the server knows it.
///
/// `version` and `device_id` echo the metadata record the server last
/// accepted for the path — they are what reconciliation merges against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// The file name.
    pub name: String,
    /// The full remote path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Last modified time (advisory).
    pub modified_at: SystemTime,
    /// Content hash, if the server computed one.
    pub content_hash: Option<String>,
    /// Accepted metadata version for the path.
    pub version: u64,
    /// Device that produced the accepted version.
    pub device_id: DeviceId,
}

/// What happened to a path since the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Modified,
    Deleted,
}

/// One entry in the server's change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
    /// The affected path.
    pub path: String,
    /// What happened.
    pub action: ChangeAction,
    /// When the server recorded the change.
    pub timestamp: SystemTime,
    /// The entry after the change. Absent for deletions.
    pub entry: Option<RemoteEntry>,
}

/// Result of a change-feed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changes since the supplied checkpoint.
    pub changes: Vec<RemoteChange>,
    /// Cursor to pass to the next query.
    pub next_checkpoint: Option<String>,
}

/// A half-open byte range request: `start..end`, or `start..` when
/// `end` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte requested.
    pub start: u64,
    /// One past the last byte requested, if bounded.
    pub end: Option<u64>,
}

impl ByteRange {
    /// A range from `start` to the end of the file.
    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }
}

/// Downloaded content plus the range the server actually served.
///
/// Servers are allowed to ignore a range request and serve the whole
/// file; callers must check `offset` rather than assume.
#[derive(Debug, Clone)]
pub struct RemoteContent {
    /// The served bytes.
    pub bytes: Vec<u8>,
    /// Offset of the first served byte within the file.
    pub offset: u64,
    /// Total file size, when the server declared it.
    pub total_size: Option<u64>,
}

/// Producer metadata accompanying an upload.
///
/// The server stores whichever record it accepts and echoes it back in
/// listings and the change feed — that echo is what other devices'
/// reconciliation merges against, so the tie-break between two devices
/// that independently created the same path stays deterministic
/// end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMeta {
    /// Metadata version produced by the uploading device.
    pub version: u64,
    /// The uploading device.
    pub device_id: DeviceId,
    /// Advisory modification time.
    pub modified_at: SystemTime,
}

/// One file in a batched upload of small files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    /// Destination path.
    pub remote_path: String,
    /// File content.
    pub content: Vec<u8>,
    /// Producer metadata.
    pub meta: UploadMeta,
}

/// Abstract remote store interface.
///
/// Implementations must be idempotent where the queue's at-least-once
/// delivery requires it: `upload` overwrites, `create_folder` dedups by
/// path, `delete` of a missing path succeeds.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the name of the remote store implementation.
    fn provider_name(&self) -> &'static str;

    /// Returns whether the store holds a usable token.
    fn is_authenticated(&self) -> bool;

    /// Exchanges credentials for a session token, retained for
    /// subsequent calls and returned for the shell to persist.
    async fn authenticate(&self, credentials: &Credentials) -> SyncResult<String>;

    /// Lists the entries directly under a folder path.
    async fn list(&self, path: &str) -> SyncResult<Vec<RemoteEntry>>;

    /// Returns changes since the checkpoint (all history when `None`).
    async fn get_changes(&self, checkpoint: Option<&str>) -> SyncResult<ChangeSet>;

    /// Uploads one file, overwriting any existing content.
    async fn upload(
        &self,
        remote_path: &str,
        content: &[u8],
        meta: &UploadMeta,
    ) -> SyncResult<RemoteEntry>;

    /// Uploads several small files in one request.
    async fn upload_batch(&self, files: &[BatchFile]) -> SyncResult<Vec<RemoteEntry>>;

    /// Uploads a large file in one pass, declaring its size up front.
    /// Implementations should stream from disk rather than buffer; the
    /// default reads the file whole and delegates to [`upload`].
    ///
    /// [`upload`]: RemoteStore::upload
    async fn upload_file(
        &self,
        remote_path: &str,
        local_path: &std::path::Path,
        _size: u64,
        meta: &UploadMeta,
    ) -> SyncResult<RemoteEntry> {
        let bytes = tokio::fs::read(local_path).await?;
        self.upload(remote_path, &bytes, meta).await
    }

    /// Downloads content, optionally a byte range. The server may serve
    /// the full file regardless; the result reports what was served.
    async fn download(&self, remote_path: &str, range: Option<ByteRange>)
        -> SyncResult<RemoteContent>;

    /// Deletes a path. Succeeds if already absent.
    async fn delete(&self, remote_path: &str) -> SyncResult<()>;

    /// Creates a folder. Succeeds if it already exists.
    async fn create_folder(&self, remote_path: &str) -> SyncResult<()>;

    /// Renames or moves a path.
    async fn rename(&self, remote_path: &str, new_path: &str) -> SyncResult<()>;
}

/// Hex-encoded SHA-256 of the given bytes — the content hash recorded
/// in metadata records and compared during conflict detection.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
