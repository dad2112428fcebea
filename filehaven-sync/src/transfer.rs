//! Chunked, resumable byte transport.
//!
//! One invocation executes one operation and returns a typed result —
//! retry policy lives entirely in the scheduler, never here. Small
//! files are batched to amortize request overhead; large files stream
//! in one pass with their size declared up front; interrupted downloads
//! resume from the last confirmed byte via range requests.

use crate::config::SettingsHandle;
use crate::error::{SyncError, SyncResult};
use crate::remote::{BatchFile, ByteRange, RemoteEntry, RemoteStore, UploadMeta};
use filehaven_store::{CacheIndex, MetadataStore};
use filehaven_types::{DeviceId, OperationType, PendingOperation};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const WRITE_CHUNK: usize = 64 * 1024;

/// Maps a remote path into the local cache directory.
#[must_use]
pub fn materialized_path(cache_dir: &Path, remote_path: &str) -> PathBuf {
    cache_dir.join(remote_path.trim_start_matches('/'))
}

/// Latest progress of the transfer engine, published through a watch
/// channel: slow consumers observe the most recent value and can never
/// stall the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferProgress {
    /// The path being transferred. Empty when idle.
    pub path: String,
    /// Bytes confirmed so far.
    pub bytes_done: u64,
    /// Total bytes, when known.
    pub total_bytes: Option<u64>,
}

/// Cancellation handle held by the caller (UI or shutdown path).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Signals cancellation to every token derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal observed by in-flight transfers.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    /// Keeps the sender alive for tokens that can never fire.
    _keep: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// Creates a connected handle/token pair.
    #[must_use]
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx: Arc::new(tx) },
            CancelToken { rx, _keep: None },
        )
    }

    /// A token that never fires, for unattended background work.
    #[must_use]
    pub fn never() -> CancelToken {
        let (tx, rx) = watch::channel(false);
        CancelToken {
            rx,
            _keep: Some(Arc::new(tx)),
        }
    }

    /// True once cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling: never resolve.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Executes transfers against the remote store.
pub struct TransferEngine {
    remote: Arc<dyn RemoteStore>,
    metadata: Arc<MetadataStore>,
    cache_index: Arc<CacheIndex>,
    settings: SettingsHandle,
    cache_dir: PathBuf,
    device_id: DeviceId,
    progress: watch::Sender<TransferProgress>,
}

impl TransferEngine {
    /// Creates a transfer engine.
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        metadata: Arc<MetadataStore>,
        cache_index: Arc<CacheIndex>,
        settings: SettingsHandle,
        cache_dir: impl Into<PathBuf>,
        device_id: DeviceId,
    ) -> Self {
        let (progress, _) = watch::channel(TransferProgress::default());
        Self {
            remote,
            metadata,
            cache_index,
            settings,
            cache_dir: cache_dir.into(),
            device_id,
            progress,
        }
    }

    /// Subscribes to progress updates.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    /// The local path where a remote path materializes.
    #[must_use]
    pub fn local_target(&self, remote_path: &str) -> PathBuf {
        materialized_path(&self.cache_dir, remote_path)
    }

    /// Executes a single queued operation. Pass/fail, no internal
    /// retries; all failure classification happens in the error type.
    pub async fn execute(&self, op: &PendingOperation, cancel: &CancelToken) -> SyncResult<()> {
        debug!(op = %op.id, path = %op.file_path, "executing {:?}", op.op_type);
        match op.op_type {
            OperationType::Upload => self.execute_upload(op, cancel).await,
            OperationType::Delete => {
                self.bounded(self.remote.delete(&op.file_path), cancel).await
            }
            OperationType::Rename | OperationType::Move => {
                let destination = op.destination_path.as_deref().ok_or_else(|| {
                    SyncError::Precondition(format!(
                        "{:?} for {} has no destination",
                        op.op_type, op.file_path
                    ))
                })?;
                self.bounded(self.remote.rename(&op.file_path, destination), cancel)
                    .await
            }
            OperationType::CreateFolder => {
                self.bounded(self.remote.create_folder(&op.file_path), cancel)
                    .await
            }
        }
    }

    async fn execute_upload(&self, op: &PendingOperation, cancel: &CancelToken) -> SyncResult<()> {
        let local_path = op.local_path.as_ref().ok_or_else(|| {
            SyncError::Precondition(format!("upload for {} has no local file", op.file_path))
        })?;
        let size = fs::metadata(local_path)
            .await
            .map_err(|e| {
                SyncError::Precondition(format!(
                    "local file missing for upload {}: {e}",
                    op.file_path
                ))
            })?
            .len();

        let meta = self.upload_meta_for(&op.file_path).await?;
        let threshold = self.settings.snapshot().await.chunking_threshold;

        self.report(&op.file_path, 0, Some(size));
        let entry = if size < threshold {
            let bytes = fs::read(local_path).await?;
            self.bounded(self.remote.upload(&op.file_path, &bytes, &meta), cancel)
                .await?
        } else {
            info!(path = %op.file_path, size, "streaming large upload");
            self.bounded(
                self.remote.upload_file(&op.file_path, local_path, size, &meta),
                cancel,
            )
            .await?
        };
        self.report(&op.file_path, size, Some(size));

        self.touch_cache(&op.file_path, entry.size).await?;
        Ok(())
    }

    /// Uploads a set of small files, grouped into batches bounded by
    /// the configured file-count and byte limits.
    pub async fn upload_small_batch(
        &self,
        ops: &[PendingOperation],
        cancel: &CancelToken,
    ) -> SyncResult<Vec<RemoteEntry>> {
        let settings = self.settings.snapshot().await;
        let mut files = Vec::with_capacity(ops.len());
        for op in ops {
            let local_path = op.local_path.as_ref().ok_or_else(|| {
                SyncError::Precondition(format!("upload for {} has no local file", op.file_path))
            })?;
            let content = fs::read(local_path).await.map_err(|e| {
                SyncError::Precondition(format!(
                    "local file missing for upload {}: {e}",
                    op.file_path
                ))
            })?;
            let meta = self.upload_meta_for(&op.file_path).await?;
            files.push(BatchFile {
                remote_path: op.file_path.clone(),
                content,
                meta,
            });
        }

        let mut uploaded = Vec::with_capacity(files.len());
        for batch in partition_batches(files, settings.batch_max_files, settings.batch_max_bytes) {
            let total: u64 = batch.iter().map(|f| f.content.len() as u64).sum();
            debug!(files = batch.len(), bytes = total, "uploading batch");
            let entries = self
                .bounded(self.remote.upload_batch(&batch), cancel)
                .await?;
            for entry in &entries {
                self.touch_cache(&entry.path, entry.size).await?;
            }
            uploaded.extend(entries);
        }
        Ok(uploaded)
    }

    /// Downloads a remote file into the cache directory, resuming from
    /// any partial prefix left by an earlier interrupted attempt.
    /// Returns the total file size on completion.
    ///
    /// Cancellation keeps the partial file — it is the resumable prefix
    /// the next attempt continues from.
    pub async fn download(&self, remote_path: &str, cancel: &CancelToken) -> SyncResult<u64> {
        let target = self.local_target(remote_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part = part_path(&target);

        let resume_from = match fs::metadata(&part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if resume_from > 0 {
            info!(path = remote_path, offset = resume_from, "resuming download");
        }

        let range = (resume_from > 0).then(|| ByteRange::starting_at(resume_from));
        let content = self
            .bounded(self.remote.download(remote_path, range), cancel)
            .await?;

        // The server may have ignored the range and served the whole
        // file; restart the local write to match what was served.
        let mut file;
        let mut bytes_done;
        if content.offset == 0 {
            file = fs::File::create(&part).await?;
            bytes_done = 0;
        } else if content.offset == resume_from {
            file = fs::OpenOptions::new().append(true).open(&part).await?;
            bytes_done = resume_from;
        } else {
            warn!(
                path = remote_path,
                requested = resume_from,
                served = content.offset,
                "server served unexpected range"
            );
            return Err(SyncError::Network(format!(
                "requested range at {resume_from}, server served {}",
                content.offset
            )));
        }

        let total = content
            .total_size
            .unwrap_or(content.offset + content.bytes.len() as u64);
        for chunk in content.bytes.chunks(WRITE_CHUNK) {
            if cancel.is_cancelled() {
                file.flush().await?;
                debug!(path = remote_path, bytes_done, "download cancelled, prefix kept");
                return Err(SyncError::Cancelled);
            }
            file.write_all(chunk).await?;
            bytes_done += chunk.len() as u64;
            self.report(remote_path, bytes_done, Some(total));
        }
        file.flush().await?;
        drop(file);

        fs::rename(&part, &target).await?;
        self.touch_cache(remote_path, bytes_done).await?;
        Ok(bytes_done)
    }

    async fn upload_meta_for(&self, remote_path: &str) -> SyncResult<UploadMeta> {
        let metadata = self.metadata.clone();
        let path = remote_path.to_string();
        let record = tokio::task::spawn_blocking(move || metadata.get(&path))
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))??;

        Ok(match record {
            Some(record) => UploadMeta {
                version: record.version,
                device_id: record.device_id,
                modified_at: record.modified_at,
            },
            None => UploadMeta {
                version: 1,
                device_id: self.device_id.clone(),
                modified_at: std::time::SystemTime::now(),
            },
        })
    }

    async fn touch_cache(&self, remote_path: &str, size: u64) -> SyncResult<()> {
        let index = self.cache_index.clone();
        let path = remote_path.to_string();
        tokio::task::spawn_blocking(move || index.record_materialized(&path, size))
            .await
            .map_err(|e| SyncError::Internal(format!("store task panicked: {e}")))??;
        Ok(())
    }

    fn report(&self, path: &str, bytes_done: u64, total_bytes: Option<u64>) {
        self.progress.send_replace(TransferProgress {
            path: path.to_string(),
            bytes_done,
            total_bytes,
        });
    }

    /// Runs a remote call under the overall transfer ceiling and the
    /// caller's cancel token. Cancellation is not a failure and never
    /// counts against retry budget.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = SyncResult<T>>,
        cancel: &CancelToken,
    ) -> SyncResult<T> {
        let ceiling = self.settings.snapshot().await.transfer_ceiling;
        tokio::select! {
            // Cancellation wins over a simultaneously ready transfer so
            // an explicit user cancel is never reported as success.
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = bounded_by(ceiling, fut) => result,
        }
    }
}

async fn bounded_by<T>(
    ceiling: Duration,
    fut: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    match tokio::time::timeout(ceiling, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout),
    }
}

/// The partial-download sibling of a target path.
fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".part");
    target.with_file_name(name)
}

/// Splits files into batches bounded by count and total bytes. A file
/// larger than the byte bound still ships, alone in its own batch.
#[must_use]
pub fn partition_batches(
    files: Vec<BatchFile>,
    max_files: usize,
    max_bytes: u64,
) -> Vec<Vec<BatchFile>> {
    let max_files = max_files.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<BatchFile> = Vec::new();
    let mut current_bytes = 0u64;

    for file in files {
        let len = file.content.len() as u64;
        let over_files = current.len() >= max_files;
        let over_bytes = !current.is_empty() && current_bytes + len > max_bytes;
        if over_files || over_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += len;
        current.push(file);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
