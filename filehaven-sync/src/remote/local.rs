//! Local-folder remote store implementation.
//!
//! Backs the remote interface with a plain directory. On the desktop
//! client this syncs against a mounted network folder; in tests it is
//! the hermetic stand-in for the server. Metadata records and the
//! change journal are kept in memory — the folder itself is the durable
//! content, exactly as a mounted share would behave.

use super::{
    content_hash, BatchFile, ByteRange, ChangeAction, ChangeSet, Credentials, RemoteChange,
    RemoteContent, RemoteEntry, RemoteStore, UploadMeta,
};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use filehaven_types::DeviceId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Stored metadata for one path.
#[derive(Debug, Clone)]
struct StoredMeta {
    version: u64,
    device_id: DeviceId,
    content_hash: Option<String>,
    modified_at: SystemTime,
    is_directory: bool,
}

#[derive(Debug, Default)]
struct FolderState {
    records: HashMap<String, StoredMeta>,
    journal: Vec<RemoteChange>,
}

/// Remote store backed by a local directory.
pub struct LocalFolderRemoteStore {
    root: PathBuf,
    state: Arc<RwLock<FolderState>>,
    authenticated: AtomicBool,
    /// When set, range requests are ignored and the full file is
    /// served — the degenerate server behavior clients must adjust to.
    ignore_ranges: AtomicBool,
}

impl LocalFolderRemoteStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::new(RwLock::new(FolderState::default())),
            authenticated: AtomicBool::new(false),
            ignore_ranges: AtomicBool::new(false),
        }
    }

    /// Makes subsequent downloads ignore range requests and serve the
    /// full file.
    pub fn set_ignore_ranges(&self, ignore: bool) {
        self.ignore_ranges.store(ignore, Ordering::Relaxed);
    }

    /// Maps a remote path onto the backing directory.
    fn resolve(&self, remote_path: &str) -> SyncResult<PathBuf> {
        let relative = remote_path.trim_start_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return Err(SyncError::Precondition(format!(
                "path escapes the store root: {remote_path}"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn entry_from(&self, remote_path: &str, meta: &StoredMeta, size: u64) -> RemoteEntry {
        let name = remote_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(remote_path)
            .to_string();
        RemoteEntry {
            name,
            path: remote_path.to_string(),
            size,
            is_directory: meta.is_directory,
            modified_at: meta.modified_at,
            content_hash: meta.content_hash.clone(),
            version: meta.version,
            device_id: meta.device_id.clone(),
        }
    }

    async fn record_upload(
        &self,
        remote_path: &str,
        content: &[u8],
        meta: &UploadMeta,
    ) -> SyncResult<RemoteEntry> {
        let target = self.resolve(remote_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, content).await?;

        let mut state = self.state.write().await;
        let existed = state.records.contains_key(remote_path);
        let stored = StoredMeta {
            version: meta.version,
            device_id: meta.device_id.clone(),
            content_hash: Some(content_hash(content)),
            modified_at: meta.modified_at,
            is_directory: false,
        };
        let entry = self.entry_from(remote_path, &stored, content.len() as u64);
        state.records.insert(remote_path.to_string(), stored);
        state.journal.push(RemoteChange {
            path: remote_path.to_string(),
            action: if existed {
                ChangeAction::Modified
            } else {
                ChangeAction::Created
            },
            timestamp: SystemTime::now(),
            entry: Some(entry.clone()),
        });
        Ok(entry)
    }
}

#[async_trait]
impl RemoteStore for LocalFolderRemoteStore {
    fn provider_name(&self) -> &'static str {
        "Local Folder"
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    async fn authenticate(&self, _credentials: &Credentials) -> SyncResult<String> {
        fs::create_dir_all(&self.root).await?;
        self.authenticated.store(true, Ordering::Relaxed);
        debug!("local folder store ready at {:?}", self.root);
        Ok("local-session".to_string())
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<RemoteEntry>> {
        let folder = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&folder).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        let state = self.state.read().await;
        while let Some(item) = dir.next_entry().await? {
            let fs_meta = item.metadata().await?;
            let name = item.file_name().to_string_lossy().into_owned();
            let remote_path = format!("{}/{}", path.trim_end_matches('/'), name);

            // Files placed in the folder outside the protocol get a
            // baseline record attributed to the store itself.
            let stored = state.records.get(&remote_path).cloned().unwrap_or(StoredMeta {
                version: 1,
                device_id: DeviceId::new("local-folder"),
                content_hash: None,
                modified_at: fs_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                is_directory: fs_meta.is_dir(),
            });
            entries.push(self.entry_from(&remote_path, &stored, fs_meta.len()));
        }
        Ok(entries)
    }

    async fn get_changes(&self, checkpoint: Option<&str>) -> SyncResult<ChangeSet> {
        let cursor: usize = match checkpoint {
            Some(s) => s
                .parse()
                .map_err(|_| SyncError::Precondition(format!("invalid checkpoint: {s}")))?,
            None => 0,
        };

        let state = self.state.read().await;
        let changes = state.journal.get(cursor..).unwrap_or_default().to_vec();
        Ok(ChangeSet {
            changes,
            next_checkpoint: Some(state.journal.len().to_string()),
        })
    }

    async fn upload(
        &self,
        remote_path: &str,
        content: &[u8],
        meta: &UploadMeta,
    ) -> SyncResult<RemoteEntry> {
        self.record_upload(remote_path, content, meta).await
    }

    async fn upload_batch(&self, files: &[BatchFile]) -> SyncResult<Vec<RemoteEntry>> {
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            entries.push(
                self.record_upload(&file.remote_path, &file.content, &file.meta)
                    .await?,
            );
        }
        Ok(entries)
    }

    async fn download(
        &self,
        remote_path: &str,
        range: Option<ByteRange>,
    ) -> SyncResult<RemoteContent> {
        let target = self.resolve(remote_path)?;
        let bytes = match fs::read(&target).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(remote_path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let total = bytes.len() as u64;

        let range = if self.ignore_ranges.load(Ordering::Relaxed) {
            None
        } else {
            range
        };

        match range {
            Some(range) if range.start < total => {
                let end = range.end.unwrap_or(total).min(total);
                Ok(RemoteContent {
                    bytes: bytes[range.start as usize..end as usize].to_vec(),
                    offset: range.start,
                    total_size: Some(total),
                })
            }
            Some(range) => Err(SyncError::Precondition(format!(
                "range start {} beyond file size {total}",
                range.start
            ))),
            None => Ok(RemoteContent {
                bytes,
                offset: 0,
                total_size: Some(total),
            }),
        }
    }

    async fn delete(&self, remote_path: &str) -> SyncResult<()> {
        let target = self.resolve(remote_path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut state = self.state.write().await;
        state.records.remove(remote_path);
        state.journal.push(RemoteChange {
            path: remote_path.to_string(),
            action: ChangeAction::Deleted,
            timestamp: SystemTime::now(),
            entry: None,
        });
        Ok(())
    }

    async fn create_folder(&self, remote_path: &str) -> SyncResult<()> {
        let target = self.resolve(remote_path)?;
        let existed = target.is_dir();
        fs::create_dir_all(&target).await?;
        if existed {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let stored = StoredMeta {
            version: 1,
            device_id: DeviceId::new("local-folder"),
            content_hash: None,
            modified_at: SystemTime::now(),
            is_directory: true,
        };
        let entry = self.entry_from(remote_path, &stored, 0);
        state.records.insert(remote_path.to_string(), stored);
        state.journal.push(RemoteChange {
            path: remote_path.to_string(),
            action: ChangeAction::Created,
            timestamp: SystemTime::now(),
            entry: Some(entry),
        });
        Ok(())
    }

    async fn rename(&self, remote_path: &str, new_path: &str) -> SyncResult<()> {
        let source = self.resolve(remote_path)?;
        let target = self.resolve(new_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(&source, &target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(remote_path.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let size = fs::metadata(&target).await.map(|m| m.len()).unwrap_or(0);
        let mut state = self.state.write().await;
        let stored = match state.records.remove(remote_path) {
            Some(mut meta) => {
                meta.version += 1;
                meta.modified_at = SystemTime::now();
                meta
            }
            None => StoredMeta {
                version: 1,
                device_id: DeviceId::new("local-folder"),
                content_hash: None,
                modified_at: SystemTime::now(),
                is_directory: false,
            },
        };
        let entry = self.entry_from(new_path, &stored, size);
        state.records.insert(new_path.to_string(), stored);
        state.journal.push(RemoteChange {
            path: remote_path.to_string(),
            action: ChangeAction::Deleted,
            timestamp: SystemTime::now(),
            entry: None,
        });
        state.journal.push(RemoteChange {
            path: new_path.to_string(),
            action: ChangeAction::Created,
            timestamp: SystemTime::now(),
            entry: Some(entry),
        });
        Ok(())
    }
}
