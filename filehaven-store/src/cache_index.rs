//! Index of materialized local copies.
//!
//! The transfer engine stamps an access here every time it touches a
//! local copy; the cache manager reads the index back oldest-first when
//! it needs to evict. Only the index is stored — the bytes live in the
//! cache directory itself.

use crate::error::StoreResult;
use crate::{from_millis, to_millis};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// A materialized local copy tracked for eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The synced path this copy materializes.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// When the copy was first written.
    pub materialized_at: SystemTime,
    /// When the copy was last read or written.
    pub last_access_at: SystemTime,
}

/// Persistent index of cached files, backed by SQLite.
pub struct CacheIndex {
    conn: Arc<Mutex<Connection>>,
}

impl CacheIndex {
    /// Opens (or creates) a cache index at the given path.
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// Opens an in-memory cache index (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                path TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                materialized_at INTEGER NOT NULL,
                last_access_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_last_access ON cache_entries(last_access_at);
            ",
        )?;
        Ok(())
    }

    /// Records a newly materialized copy, or refreshes an existing one.
    pub fn record_materialized(&self, path: &str, size: u64) -> StoreResult<()> {
        let now = to_millis(SystemTime::now());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cache_entries (path, size, materialized_at, last_access_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(path) DO UPDATE SET size = ?2, last_access_at = ?3",
            params![path, size as i64, now],
        )?;
        Ok(())
    }

    /// Stamps an access on an existing entry.
    pub fn touch(&self, path: &str) -> StoreResult<()> {
        let now = to_millis(SystemTime::now());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cache_entries SET last_access_at = ?2 WHERE path = ?1",
            params![path, now],
        )?;
        Ok(())
    }

    /// Loads a single entry.
    pub fn get(&self, path: &str) -> StoreResult<Option<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT path, size, materialized_at, last_access_at
                 FROM cache_entries WHERE path = ?1",
                params![path],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Removes an entry after its file is evicted.
    pub fn remove(&self, path: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM cache_entries WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Number of tracked copies.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All entries, least recently accessed first — eviction order.
    pub fn oldest_first(&self) -> StoreResult<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, size, materialized_at, last_access_at
             FROM cache_entries ORDER BY last_access_at, path",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Entries whose materialization is older than the cutoff.
    pub fn materialized_before(&self, cutoff: SystemTime) -> StoreResult<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, size, materialized_at, last_access_at
             FROM cache_entries WHERE materialized_at < ?1
             ORDER BY last_access_at, path",
        )?;
        let rows = stmt.query_map(params![to_millis(cutoff)], row_to_entry)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

fn row_to_entry(row: &Row<'_>) -> Result<CacheEntry, rusqlite::Error> {
    let size: i64 = row.get(1)?;
    let materialized_at: i64 = row.get(2)?;
    let last_access_at: i64 = row.get(3)?;
    Ok(CacheEntry {
        path: row.get(0)?,
        size: size.max(0) as u64,
        materialized_at: from_millis(materialized_at),
        last_access_at: from_millis(last_access_at),
    })
}
