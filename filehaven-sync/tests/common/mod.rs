#![allow(dead_code)]

use async_trait::async_trait;
use filehaven_store::{CacheIndex, MetadataStore, OperationStore};
use filehaven_sync::{
    BatchFile, ByteRange, CacheManager, ChangeSet, ConnectivityMonitor, Credentials,
    LocalFolderRemoteStore, OperationQueue, RemoteContent, RemoteEntry, RemoteStore,
    SettingsHandle, SyncCoordinator, SyncError, SyncResult, SyncSettings, TransferEngine,
    UploadMeta,
};
use filehaven_types::DeviceId;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Initializes test logging once; respects `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Settings tuned for fast tests: no backoff delay, small batches.
pub fn test_settings() -> SyncSettings {
    SyncSettings {
        retry_base_delay: Duration::ZERO,
        retry_period: Duration::from_millis(50),
        cleanup_period: Duration::from_millis(50),
        cache_sweep_period: Duration::from_millis(50),
        transfer_ceiling: Duration::from_secs(10),
        ..SyncSettings::default()
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        account: "user@example.com".to_string(),
        secret: "hunter2".to_string(),
    }
}

/// One device's engine stack wired against a shared server folder.
pub struct Device {
    pub cache_dir: TempDir,
    pub settings: SettingsHandle,
    pub op_store: Arc<OperationStore>,
    pub meta_store: Arc<MetadataStore>,
    pub cache_index: Arc<CacheIndex>,
    pub remote: Arc<dyn RemoteStore>,
    pub engine: Arc<TransferEngine>,
    pub queue: Arc<OperationQueue>,
    pub cache: Arc<CacheManager>,
    pub monitor: ConnectivityMonitor,
    pub coordinator: Arc<SyncCoordinator>,
}

impl Device {
    pub async fn new(device_id: &str, remote: Arc<dyn RemoteStore>) -> Device {
        let cache_dir = TempDir::new().unwrap();
        let settings = SettingsHandle::new(test_settings());
        let op_store = Arc::new(OperationStore::open_in_memory().unwrap());
        let meta_store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let cache_index = Arc::new(CacheIndex::open_in_memory().unwrap());

        let engine = Arc::new(TransferEngine::new(
            remote.clone(),
            meta_store.clone(),
            cache_index.clone(),
            settings.clone(),
            cache_dir.path(),
            DeviceId::new(device_id),
        ));
        let queue = Arc::new(OperationQueue::new(op_store.clone(), settings.clone()));
        let cache = Arc::new(CacheManager::new(
            cache_index.clone(),
            op_store.clone(),
            settings.clone(),
            cache_dir.path(),
        ));
        let monitor = ConnectivityMonitor::new(true);

        let coordinator = Arc::new(
            SyncCoordinator::new(
                DeviceId::new(device_id),
                remote.clone(),
                meta_store.clone(),
                queue.clone(),
                engine.clone(),
                cache.clone(),
                monitor.subscribe(),
                settings.clone(),
                cache_dir.path(),
            )
            .await
            .unwrap(),
        );

        Device {
            cache_dir,
            settings,
            op_store,
            meta_store,
            cache_index,
            remote,
            engine,
            queue,
            cache,
            monitor,
            coordinator,
        }
    }

    /// Writes a file into this device's cache directory and returns its
    /// local path, ready to record as an edit.
    pub async fn write_local(&self, remote_path: &str, content: &[u8]) -> std::path::PathBuf {
        let target = filehaven_sync::materialized_path(self.cache_dir.path(), remote_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&target, content).await.unwrap();
        target
    }
}

/// Creates an authenticated server folder plus one device stack.
pub async fn single_device(device_id: &str) -> (TempDir, Arc<LocalFolderRemoteStore>, Device) {
    let server_dir = TempDir::new().unwrap();
    let remote = Arc::new(LocalFolderRemoteStore::new(server_dir.path()));
    remote.authenticate(&credentials()).await.unwrap();
    let device = Device::new(device_id, remote.clone()).await;
    (server_dir, remote, device)
}

/// A remote that fails a programmable number of calls before
/// delegating to an inner local-folder store.
pub struct FlakyRemote {
    inner: LocalFolderRemoteStore,
    fail_next: AtomicU32,
    auth_failures: AtomicU32,
    pub upload_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
}

impl FlakyRemote {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalFolderRemoteStore::new(root),
            fail_next: AtomicU32::new(0),
            auth_failures: AtomicU32::new(0),
            upload_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    /// The next `n` mutating calls fail with a transient network error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// The next `n` mutating calls fail with an auth error.
    pub fn fail_auth_next(&self, n: u32) {
        self.auth_failures.store(n, Ordering::SeqCst);
    }

    fn gate(&self) -> SyncResult<()> {
        if self
            .auth_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Auth("token expired".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Network("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    fn provider_name(&self) -> &'static str {
        "Flaky Test Remote"
    }

    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    async fn authenticate(&self, credentials: &Credentials) -> SyncResult<String> {
        self.inner.authenticate(credentials).await
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<RemoteEntry>> {
        self.inner.list(path).await
    }

    async fn get_changes(&self, checkpoint: Option<&str>) -> SyncResult<ChangeSet> {
        self.inner.get_changes(checkpoint).await
    }

    async fn upload(
        &self,
        remote_path: &str,
        content: &[u8],
        meta: &UploadMeta,
    ) -> SyncResult<RemoteEntry> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.inner.upload(remote_path, content, meta).await
    }

    async fn upload_batch(&self, files: &[BatchFile]) -> SyncResult<Vec<RemoteEntry>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.inner.upload_batch(files).await
    }

    async fn download(
        &self,
        remote_path: &str,
        range: Option<ByteRange>,
    ) -> SyncResult<RemoteContent> {
        self.gate()?;
        self.inner.download(remote_path, range).await
    }

    async fn delete(&self, remote_path: &str) -> SyncResult<()> {
        self.gate()?;
        self.inner.delete(remote_path).await
    }

    async fn create_folder(&self, remote_path: &str) -> SyncResult<()> {
        self.gate()?;
        self.inner.create_folder(remote_path).await
    }

    async fn rename(&self, remote_path: &str, new_path: &str) -> SyncResult<()> {
        self.gate()?;
        self.inner.rename(remote_path, new_path).await
    }
}
