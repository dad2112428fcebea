//! Durable per-path CRDT table, device clock, and checkpoint.
//!
//! One row per path ever observed, tombstones included. Rows are
//! upserted by reconciliation and local edits, never deleted — erasing
//! a record would reopen the resurrection races the tombstones exist
//! to prevent.

use crate::error::StoreResult;
use crate::{from_millis, to_millis};
use filehaven_crdt::{FileMetadata, VectorClock};
use filehaven_types::DeviceId;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const CLOCK_KEY: &str = "device_clock";
const CHECKPOINT_KEY: &str = "checkpoint";

/// Persistent store for replicated file metadata, backed by SQLite.
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetadataStore {
    /// Opens (or creates) a metadata store at the given path.
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory metadata store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS file_metadata (
                path TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                is_directory INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                version INTEGER NOT NULL,
                device_id TEXT NOT NULL,
                content_hash TEXT,
                deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS sync_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Inserts or replaces the record for a path.
    pub fn save(&self, meta: &FileMetadata) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO file_metadata
             (path, name, size, is_directory, modified_at, version, device_id, content_hash, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                meta.path,
                meta.name,
                meta.size as i64,
                meta.is_directory,
                to_millis(meta.modified_at),
                meta.version as i64,
                meta.device_id.to_string(),
                meta.content_hash,
                meta.deleted,
            ],
        )?;
        Ok(())
    }

    /// Loads the record for a path, tombstoned or not.
    pub fn get(&self, path: &str) -> StoreResult<Option<FileMetadata>> {
        let conn = self.conn.lock().unwrap();
        let meta = conn
            .query_row(
                "SELECT path, name, size, is_directory, modified_at, version,
                        device_id, content_hash, deleted
                 FROM file_metadata WHERE path = ?1",
                params![path],
                row_to_metadata,
            )
            .optional()?;
        Ok(meta)
    }

    /// Loads every record, tombstones included.
    pub fn load_all(&self) -> StoreResult<Vec<FileMetadata>> {
        self.load_where("1=1")
    }

    /// Loads the records for paths that currently exist.
    pub fn load_live(&self) -> StoreResult<Vec<FileMetadata>> {
        self.load_where("deleted = 0")
    }

    fn load_where(&self, predicate: &str) -> StoreResult<Vec<FileMetadata>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT path, name, size, is_directory, modified_at, version,
                    device_id, content_hash, deleted
             FROM file_metadata WHERE {predicate} ORDER BY path"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_metadata)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Returns the number of stored records.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM file_metadata", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ── Device clock ─────────────────────────────────────────────

    /// Persists the device's vector clock.
    pub fn save_clock(&self, clock: &VectorClock) -> StoreResult<()> {
        self.save_meta(CLOCK_KEY, &serde_json::to_string(clock)?)
    }

    /// Loads the device's vector clock, empty if never saved.
    pub fn load_clock(&self) -> StoreResult<VectorClock> {
        match self.load_meta(CLOCK_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(VectorClock::new()),
        }
    }

    // ── Checkpoint ───────────────────────────────────────────────

    /// Persists the opaque change-feed checkpoint.
    pub fn save_checkpoint(&self, checkpoint: &str) -> StoreResult<()> {
        self.save_meta(CHECKPOINT_KEY, checkpoint)
    }

    /// Loads the change-feed checkpoint, if any reconciliation has
    /// completed before.
    pub fn load_checkpoint(&self) -> StoreResult<Option<String>> {
        self.load_meta(CHECKPOINT_KEY)
    }

    fn save_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn load_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

fn row_to_metadata(row: &Row<'_>) -> Result<FileMetadata, rusqlite::Error> {
    let size: i64 = row.get(2)?;
    let modified_at: i64 = row.get(4)?;
    let version: i64 = row.get(5)?;
    let device_id: String = row.get(6)?;

    Ok(FileMetadata {
        path: row.get(0)?,
        name: row.get(1)?,
        size: size.max(0) as u64,
        is_directory: row.get(3)?,
        modified_at: from_millis(modified_at),
        version: version.max(0) as u64,
        device_id: DeviceId::new(device_id),
        content_hash: row.get(7)?,
        deleted: row.get(8)?,
    })
}
