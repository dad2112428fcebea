//! Durable log of pending operations.
//!
//! The queue's source of truth. Rows are only ever inserted, updated in
//! status, or pruned by the cleanup sweep — an operation that failed
//! its last retry stays visible until pruned or dismissed.

use crate::error::{StoreError, StoreResult};
use crate::{from_millis, to_millis};
use filehaven_types::{OperationId, OperationStatus, OperationType, PendingOperation};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Persistent store for the pending-operation log, backed by SQLite.
pub struct OperationStore {
    conn: Arc<Mutex<Connection>>,
}

impl OperationStore {
    /// Opens (or creates) an operation store at the given path.
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory operation store (for testing).
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
            CREATE TABLE IF NOT EXISTS operations (
                id TEXT PRIMARY KEY,
                op_type TEXT NOT NULL,
                file_path TEXT NOT NULL,
                local_path TEXT,
                destination_path TEXT,
                payload TEXT,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                last_retry_at INTEGER,
                completed_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_operations_path ON operations(file_path);
            CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status);
            ",
        )?;
        Ok(())
    }

    /// Inserts or updates an operation.
    pub fn save(&self, op: &PendingOperation) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO operations
             (id, op_type, file_path, local_path, destination_path, payload,
              status, retry_count, max_retries, error_message,
              created_at, last_retry_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                op.id.to_string(),
                op.op_type.as_str(),
                op.file_path,
                op.local_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                op.destination_path,
                op.payload,
                op.status.as_str(),
                op.retry_count,
                op.max_retries,
                op.error_message,
                to_millis(op.created_at),
                op.last_retry_at.map(to_millis),
                op.completed_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    /// Loads one operation by id.
    pub fn get(&self, id: &OperationId) -> StoreResult<Option<PendingOperation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, op_type, file_path, local_path, destination_path, payload,
                    status, retry_count, max_retries, error_message,
                    created_at, last_retry_at, completed_at
             FROM operations WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_operation(row)?)),
            None => Ok(None),
        }
    }

    /// Loads every operation, oldest first.
    pub fn load_all(&self) -> StoreResult<Vec<PendingOperation>> {
        self.load_where("1=1")
    }

    /// Loads every operation that has not completed, in enqueue order.
    /// The id is a time-ordered UUID, so it breaks created_at ties.
    pub fn load_incomplete(&self) -> StoreResult<Vec<PendingOperation>> {
        self.load_where("status != 'completed'")
    }

    /// Operations parked after exhausting their retry budget. These are
    /// surfaced to the user, never silently dropped.
    pub fn needs_attention(&self) -> StoreResult<Vec<PendingOperation>> {
        self.load_where("status = 'failed' AND retry_count >= max_retries")
    }

    fn load_where(&self, predicate: &str) -> StoreResult<Vec<PendingOperation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT id, op_type, file_path, local_path, destination_path, payload,
                    status, retry_count, max_retries, error_message,
                    created_at, last_retry_at, completed_at
             FROM operations WHERE {predicate} ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], RawOperationRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_operation()?);
        }
        Ok(result)
    }

    /// True if any pending or retrying operation references the path,
    /// either as its target or as its local source file. Such paths are
    /// pinned against cache eviction.
    pub fn references_path(&self, path: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM operations
             WHERE status IN ('pending', 'retrying')
               AND (file_path = ?1 OR local_path = ?1)",
            params![path],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Deletes terminal records (completed, or failed with exhausted
    /// budget) whose last activity is older than the cutoff. Returns the
    /// number of rows removed.
    pub fn prune_terminal_before(&self, cutoff: SystemTime) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff_ms = to_millis(cutoff);
        let removed = conn.execute(
            "DELETE FROM operations
             WHERE (status = 'completed' AND COALESCE(completed_at, created_at) < ?1)
                OR (status = 'failed' AND retry_count >= max_retries
                    AND COALESCE(last_retry_at, created_at) < ?1)",
            params![cutoff_ms],
        )?;
        Ok(removed)
    }

    /// Removes a single operation (manual dismissal of a parked one).
    pub fn remove(&self, id: &OperationId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM operations WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    /// Returns the total number of stored operations.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Intermediate row shape so query_map stays infallible and domain
/// mapping errors surface as StoreError, not rusqlite errors.
struct RawOperationRow {
    id: String,
    op_type: String,
    file_path: String,
    local_path: Option<String>,
    destination_path: Option<String>,
    payload: Option<String>,
    status: String,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
    created_at: i64,
    last_retry_at: Option<i64>,
    completed_at: Option<i64>,
}

impl RawOperationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            op_type: row.get(1)?,
            file_path: row.get(2)?,
            local_path: row.get(3)?,
            destination_path: row.get(4)?,
            payload: row.get(5)?,
            status: row.get(6)?,
            retry_count: row.get(7)?,
            max_retries: row.get(8)?,
            error_message: row.get(9)?,
            created_at: row.get(10)?,
            last_retry_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    }

    fn into_operation(self) -> StoreResult<PendingOperation> {
        let id = OperationId::parse(&self.id)
            .map_err(|e| StoreError::InvalidData(format!("invalid operation id: {e}")))?;
        let op_type = OperationType::parse(&self.op_type)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown op_type: {}", self.op_type)))?;
        let status = OperationStatus::parse(&self.status)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown status: {}", self.status)))?;

        Ok(PendingOperation {
            id,
            op_type,
            file_path: self.file_path,
            local_path: self.local_path.map(PathBuf::from),
            destination_path: self.destination_path,
            payload: self.payload,
            status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            error_message: self.error_message,
            created_at: from_millis(self.created_at),
            last_retry_at: self.last_retry_at.map(from_millis),
            completed_at: self.completed_at.map(from_millis),
        })
    }
}

fn row_to_operation(row: &Row<'_>) -> StoreResult<PendingOperation> {
    RawOperationRow::from_row(row)?.into_operation()
}
