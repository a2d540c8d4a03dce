//! Shared storage handle.
//!
//! One `rusqlite::Connection` per database, guarded by one mutex: every
//! statement acquires the lock for its full duration, so statements
//! serialize strictly — at most one in flight process-wide. All calls
//! block until the backend answers; there are no timeouts and no
//! cancellation. The connection runs in auto-commit mode, each statement
//! committing independently.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::error::Result;
use crate::value::Value;

pub struct ConnectionManager {
    conn: Mutex<Connection>,
    statements: AtomicU64,
}

impl ConnectionManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::wrap(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wrap(Connection::open_in_memory()?))
    }

    fn wrap(conn: Connection) -> Self {
        ConnectionManager {
            conn: Mutex::new(conn),
            statements: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked between
        // statements; the connection itself is still usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, sql: &str, params: &[Value]) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        debug!(%sql, params = params.len(), "executing statement");
    }

    /// Execute a non-SELECT statement; returns the affected row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.count(sql, params);
        let conn = self.lock();
        Ok(conn.execute(sql, params_from_iter(params.iter()))?)
    }

    /// Execute an INSERT and return the storage-assigned row identity.
    /// Holds the lock across the insert and the id read.
    pub fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.count(sql, params);
        let conn = self.lock();
        conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(conn.last_insert_rowid())
    }

    /// Run a SELECT, returning each row as column-name/value pairs in
    /// statement column order.
    pub fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<(String, Value)>>> {
        self.count(sql, params);
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                columns.push((name.clone(), Value::from(row.get_ref(i)?)));
            }
            out.push(columns);
        }
        Ok(out)
    }

    /// Probe the catalog for a table. SQLite has no SHOW TABLES; query
    /// sqlite_master instead.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self.select(
            "SELECT name FROM sqlite_master WHERE type='table' AND tbl_name=?",
            &[Value::Text(table.to_string())],
        )?;
        Ok(!rows.is_empty())
    }

    /// Number of statements executed so far.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_statement_count(&self) {
        self.statements.store(0, Ordering::Relaxed);
    }

    /// Close the handle explicitly, surfacing any shutdown error.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| e.into())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("statements", &self.statement_count())
            .finish_non_exhaustive()
    }
}
