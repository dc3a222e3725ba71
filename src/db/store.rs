//! In-memory SQLite catalog with snapshot import/export.

use crate::error::{AppError, Result, db_err};
use parking_lot::Mutex;
use rusqlite::backup::Backup;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// First 16 bytes of every SQLite database image.
const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// Pages copied per backup step when moving snapshots in and out.
const BACKUP_PAGES_PER_STEP: i32 = 256;

/// File name used when staging snapshots in a scratch directory.
const STAGED_SNAPSHOT: &str = "snapshot.db";

/// Catalog store wrapper for serialized access.
///
/// The catalog lives entirely in memory; the file on disk is only ever a
/// snapshot produced by [`Store::export_snapshot`]. Every call takes the
/// connection lock, so statements never interleave.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// One result row with its column names.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Column names, in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values, in select order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Integer value of a named column.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text value of a named column.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        match self.get(column)? {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl Store {
    /// Open the catalog at `path`.
    ///
    /// Loads the snapshot if the file exists, otherwise starts an empty
    /// in-memory catalog. Tables are not created here.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No catalog on disk, starting empty");
            return Self::open_memory();
        }

        let bytes = std::fs::read(path).map_err(|e| {
            AppError::CorruptSnapshot(format!("Failed to read {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            bytes = bytes.len(),
            "Loading catalog snapshot"
        );
        Self::from_snapshot(&bytes)
    }

    /// Open an empty in-memory catalog.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open catalog"))?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Build a catalog from snapshot bytes.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        // SQLite treats a zero-length file as an empty database.
        if bytes.is_empty() {
            tracing::warn!("Catalog snapshot is empty, starting with an empty catalog");
            return Self::open_memory();
        }

        if bytes.len() < SQLITE_HEADER.len() || &bytes[..SQLITE_HEADER.len()] != SQLITE_HEADER {
            return Err(AppError::CorruptSnapshot(
                "missing SQLite header".to_string(),
            ));
        }

        let scratch = tempfile::tempdir()?;
        let staged = scratch.path().join(STAGED_SNAPSHOT);
        std::fs::write(&staged, bytes)?;

        let corrupt = |e: rusqlite::Error| AppError::CorruptSnapshot(e.to_string());

        let source =
            Connection::open_with_flags(&staged, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(corrupt)?;
        let mut conn = Connection::open_in_memory().map_err(db_err("Failed to open catalog"))?;
        {
            let backup = Backup::new(&source, &mut conn).map_err(corrupt)?;
            backup
                .run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)
                .map_err(corrupt)?;
        }
        drop(source);

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(corrupt)?;
        if check != "ok" {
            return Err(AppError::CorruptSnapshot(format!(
                "integrity check failed: {}",
                check
            )));
        }

        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Per-connection settings applied after every open.
    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err("Failed to enable foreign keys"))
    }

    /// Execute a statement and return the number of rows changed.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(sql, params).map_err(db_err("Statement failed"))
    }

    /// Run a query and collect every row.
    pub fn query<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(db_err("Failed to prepare query"))?;

        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut rows = stmt.query(params).map_err(db_err("Query failed"))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err("Failed to read row"))? {
            let values = (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("Failed to decode row"))?;
            out.push(Row {
                columns: Arc::clone(&columns),
                values,
            });
        }

        Ok(out)
    }

    /// Serialize the whole catalog into a SQLite database image.
    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir()?;
        let staged = scratch.path().join(STAGED_SNAPSHOT);

        {
            let mut target =
                Connection::open(&staged).map_err(db_err("Failed to open snapshot target"))?;
            let conn = self.conn.lock();
            let backup =
                Backup::new(&conn, &mut target).map_err(db_err("Failed to start snapshot"))?;
            backup
                .run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)
                .map_err(db_err("Failed to export snapshot"))?;
        }

        Ok(std::fs::read(&staged)?)
    }

    /// Number of rows in one of the catalog tables.
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        if !matches!(table, "books" | "authors" | "book_authors") {
            return Err(AppError::InvalidFormat(format!("Unknown table: {}", table)));
        }

        let conn = self.conn.lock();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .map_err(db_err("Failed to count rows"))
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> T {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}
