//! HTTP remote store implementation.
//!
//! Talks to the Filehaven server's REST API with bearer-token auth.
//! Range requests drive resumable downloads; the server may answer 206
//! with the requested suffix or 200 with the whole file, and both are
//! reported faithfully to the caller.

use super::{
    content_hash, BatchFile, ByteRange, ChangeAction, ChangeSet, Credentials, RemoteChange,
    RemoteContent, RemoteEntry, RemoteStore, UploadMeta,
};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use filehaven_types::DeviceId;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

/// HTTP remote configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRemoteConfig {
    /// Base URL of the Filehaven server (e.g. `https://haven.example.com`).
    pub base_url: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout. Large transfers get their overall ceiling
    /// from the transfer engine, not from here.
    pub read_timeout: Duration,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://haven.example.com".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Server API response structures.
#[derive(Debug, Deserialize)]
struct ApiEntry {
    name: String,
    path: String,
    size: u64,
    #[serde(default)]
    is_directory: bool,
    modified_at: String,
    #[serde(default)]
    content_hash: Option<String>,
    version: u64,
    device_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiEntryList {
    entries: Vec<ApiEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiChange {
    path: String,
    action: String,
    timestamp: String,
    #[serde(default)]
    entry: Option<ApiEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiChangeSet {
    changes: Vec<ApiChange>,
    #[serde(default)]
    next_checkpoint: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiBatchFile {
    path: String,
    content: String,
    version: u64,
    device_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// HTTP remote store implementation.
pub struct HttpRemoteStore {
    config: HttpRemoteConfig,
    client: Client,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpRemoteStore {
    /// Creates a new HTTP remote store.
    #[must_use]
    pub fn new(config: HttpRemoteConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            config,
            client,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an existing token (e.g. loaded from the platform keychain).
    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.config.base_url)
    }

    async fn bearer(&self) -> SyncResult<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::Auth("no session token".to_string()))
    }

    /// Maps non-success statuses onto the engine's failure classes.
    async fn check(response: Response) -> SyncResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Auth(body),
            StatusCode::NOT_FOUND => SyncError::NotFound(body),
            StatusCode::REQUEST_TIMEOUT => SyncError::Timeout,
            _ => SyncError::Network(format!("server returned {status}: {body}")),
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn provider_name(&self) -> &'static str {
        "Filehaven HTTP"
    }

    fn is_authenticated(&self) -> bool {
        // try_read never contends for long: writers hold the lock only
        // to swap the token.
        self.token
            .try_read()
            .map(|t| t.is_some())
            .unwrap_or(false)
    }

    async fn authenticate(&self, credentials: &Credentials) -> SyncResult<String> {
        let response = self
            .client
            .post(self.url("/api/auth"))
            .json(credentials)
            .send()
            .await?;
        let token: TokenResponse = Self::check(response).await?.json().await?;

        *self.token.write().await = Some(token.token.clone());
        debug!("authenticated against {}", self.config.base_url);
        Ok(token.token)
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<RemoteEntry>> {
        let response = self
            .client
            .get(self.url("/api/list"))
            .bearer_auth(self.bearer().await?)
            .query(&[("path", path)])
            .send()
            .await?;
        let list: ApiEntryList = Self::check(response).await?.json().await?;
        list.entries.into_iter().map(api_entry).collect()
    }

    async fn get_changes(&self, checkpoint: Option<&str>) -> SyncResult<ChangeSet> {
        let mut request = self
            .client
            .get(self.url("/api/changes"))
            .bearer_auth(self.bearer().await?);
        if let Some(cursor) = checkpoint {
            request = request.query(&[("checkpoint", cursor)]);
        }
        let set: ApiChangeSet = Self::check(request.send().await?).await?.json().await?;

        let mut changes = Vec::with_capacity(set.changes.len());
        for change in set.changes {
            changes.push(RemoteChange {
                path: change.path,
                action: parse_action(&change.action)?,
                timestamp: parse_time(&change.timestamp)?,
                entry: change.entry.map(api_entry).transpose()?,
            });
        }
        Ok(ChangeSet {
            changes,
            next_checkpoint: set.next_checkpoint,
        })
    }

    async fn upload(
        &self,
        remote_path: &str,
        content: &[u8],
        meta: &UploadMeta,
    ) -> SyncResult<RemoteEntry> {
        let response = self
            .client
            .put(self.url("/api/file"))
            .bearer_auth(self.bearer().await?)
            .query(&[("path", remote_path)])
            .header(reqwest::header::CONTENT_LENGTH, content.len())
            .header("x-content-hash", content_hash(content))
            .header("x-meta-version", meta.version)
            .header("x-meta-device", meta.device_id.to_string())
            .body(content.to_vec())
            .send()
            .await?;
        let entry: ApiEntry = Self::check(response).await?.json().await?;
        api_entry(entry)
    }

    async fn upload_batch(&self, files: &[BatchFile]) -> SyncResult<Vec<RemoteEntry>> {
        let payload: Vec<ApiBatchFile> = files
            .iter()
            .map(|f| ApiBatchFile {
                path: f.remote_path.clone(),
                content: base64::engine::general_purpose::STANDARD.encode(&f.content),
                version: f.meta.version,
                device_id: f.meta.device_id.to_string(),
            })
            .collect();

        let response = self
            .client
            .post(self.url("/api/batch"))
            .bearer_auth(self.bearer().await?)
            .json(&serde_json::json!({ "files": payload }))
            .send()
            .await?;
        let list: ApiEntryList = Self::check(response).await?.json().await?;
        list.entries.into_iter().map(api_entry).collect()
    }

    async fn upload_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        size: u64,
        meta: &UploadMeta,
    ) -> SyncResult<RemoteEntry> {
        use tokio::io::AsyncReadExt;

        // Stream from disk in one pass with the size declared up front.
        let file = tokio::fs::File::open(local_path).await?;
        let stream = futures::stream::unfold(file, |mut file| async move {
            let mut buf = vec![0u8; 64 * 1024];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok::<_, std::io::Error>(buf), file))
                }
                Err(e) => Some((Err(e), file)),
            }
        });

        let response = self
            .client
            .put(self.url("/api/file"))
            .bearer_auth(self.bearer().await?)
            .query(&[("path", remote_path)])
            .header(reqwest::header::CONTENT_LENGTH, size)
            .header("x-meta-version", meta.version)
            .header("x-meta-device", meta.device_id.to_string())
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;
        let entry: ApiEntry = Self::check(response).await?.json().await?;
        api_entry(entry)
    }

    async fn download(
        &self,
        remote_path: &str,
        range: Option<ByteRange>,
    ) -> SyncResult<RemoteContent> {
        let mut request = self
            .client
            .get(self.url("/api/file"))
            .bearer_auth(self.bearer().await?)
            .query(&[("path", remote_path)]);

        if let Some(range) = range {
            let header = match range.end {
                Some(end) => format!("bytes={}-{}", range.start, end.saturating_sub(1)),
                None => format!("bytes={}-", range.start),
            };
            request = request.header(reqwest::header::RANGE, header);
        }

        let response = Self::check(request.send().await?).await?;
        let status = response.status();
        let (offset, total_size) = if status == StatusCode::PARTIAL_CONTENT {
            parse_content_range(
                response
                    .headers()
                    .get(reqwest::header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok()),
            )
        } else {
            // Full serve: the range request was ignored.
            let total = response.content_length();
            (0, total)
        };

        let bytes = response.bytes().await?.to_vec();
        Ok(RemoteContent {
            bytes,
            offset,
            total_size,
        })
    }

    async fn delete(&self, remote_path: &str) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.url("/api/file"))
            .bearer_auth(self.bearer().await?)
            .query(&[("path", remote_path)])
            .send()
            .await?;
        // Deleting an already-absent path must succeed: the queue
        // delivers at least once.
        match Self::check(response).await {
            Ok(_) | Err(SyncError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_folder(&self, remote_path: &str) -> SyncResult<()> {
        let response = self
            .client
            .post(self.url("/api/folder"))
            .bearer_auth(self.bearer().await?)
            .json(&serde_json::json!({ "path": remote_path }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn rename(&self, remote_path: &str, new_path: &str) -> SyncResult<()> {
        let response = self
            .client
            .post(self.url("/api/rename"))
            .bearer_auth(self.bearer().await?)
            .json(&serde_json::json!({ "path": remote_path, "new_path": new_path }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

fn api_entry(entry: ApiEntry) -> SyncResult<RemoteEntry> {
    Ok(RemoteEntry {
        name: entry.name,
        path: entry.path,
        size: entry.size,
        is_directory: entry.is_directory,
        modified_at: parse_time(&entry.modified_at)?,
        content_hash: entry.content_hash,
        version: entry.version,
        device_id: DeviceId::new(entry.device_id),
    })
}

fn parse_action(s: &str) -> SyncResult<ChangeAction> {
    match s {
        "created" => Ok(ChangeAction::Created),
        "modified" => Ok(ChangeAction::Modified),
        "deleted" => Ok(ChangeAction::Deleted),
        other => Err(SyncError::Network(format!("unknown change action: {other}"))),
    }
}

fn parse_time(s: &str) -> SyncResult<SystemTime> {
    let parsed: DateTime<Utc> = s
        .parse()
        .map_err(|e| SyncError::Network(format!("invalid timestamp {s:?}: {e}")))?;
    Ok(parsed.into())
}

/// Parses `Content-Range: bytes <start>-<end>/<total>`.
fn parse_content_range(header: Option<&str>) -> (u64, Option<u64>) {
    let Some(value) = header else {
        return (0, None);
    };
    let Some(rest) = value.strip_prefix("bytes ") else {
        return (0, None);
    };
    let mut parts = rest.split('/');
    let range = parts.next().unwrap_or_default();
    let total = parts.next().and_then(|t| t.parse().ok());
    let start = range
        .split('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    (start, total)
}
