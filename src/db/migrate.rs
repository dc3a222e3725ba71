//! Schema creation, additive columns and one-time legacy data migration.

use crate::db::Store;
use crate::db::books::link_authors;
use crate::error::{Result, db_err};
use crate::library::book::split_author_names;
use rusqlite::types::Value;
use rusqlite::Connection;

/// Tables with the full current column set.
const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS books (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT,
        description TEXT,
        category TEXT,
        isbn TEXT,
        folderPath TEXT NOT NULL,
        fileName TEXT NOT NULL,
        coverImage TEXT,
        fileSize INTEGER,
        pageCount INTEGER,
        publisher TEXT,
        year INTEGER,
        language TEXT,
        createdAt DATETIME DEFAULT CURRENT_TIMESTAMP,
        updatedAt DATETIME,
        fileHash TEXT
    );

    CREATE TABLE IF NOT EXISTS authors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        bio TEXT,
        photoPath TEXT,
        createdAt DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS book_authors (
        book_id TEXT,
        author_id INTEGER,
        role TEXT DEFAULT 'author',
        PRIMARY KEY (book_id, author_id),
        FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE,
        FOREIGN KEY (author_id) REFERENCES authors(id) ON DELETE CASCADE
    );
"#;

/// Indexes, created once every column they cover is known to exist.
const INDEX_SQL: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_books_file_hash ON books(fileHash);
    CREATE INDEX IF NOT EXISTS idx_book_authors_author ON book_authors(author_id);
"#;

/// Columns added to `books` after the first released schema.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("fileSize", "INTEGER"),
    ("pageCount", "INTEGER"),
    ("publisher", "TEXT"),
    ("year", "INTEGER"),
    ("language", "TEXT"),
    ("updatedAt", "DATETIME"),
    ("fileHash", "TEXT"),
];

/// Outcome of the legacy author migration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LegacyAuthorStats {
    /// Books whose author string was parsed.
    pub books: usize,
    /// Author rows created.
    pub authors: usize,
    /// Book/author links created.
    pub links: usize,
    /// Books skipped because their author field could not be migrated.
    pub skipped: usize,
}

/// What a migrator run changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Tables that did not exist before this run.
    pub tables_created: Vec<String>,
    /// Columns added to `books`.
    pub columns_added: Vec<String>,
    /// Blank digests rewritten to NULL.
    pub digests_normalized: usize,
    /// Legacy author migration, if it ran.
    pub legacy_authors: Option<LegacyAuthorStats>,
}

impl MigrationReport {
    /// Whether the run changed the catalog's schema or data.
    pub fn changed(&self) -> bool {
        !self.tables_created.is_empty()
            || !self.columns_added.is_empty()
            || self.digests_normalized > 0
            || self
                .legacy_authors
                .as_ref()
                .is_some_and(|s| s.authors > 0 || s.links > 0)
    }
}

/// Brings an opened catalog to the current schema.
pub struct SchemaMigrator<'a> {
    store: &'a Store,
}

impl<'a> SchemaMigrator<'a> {
    /// Migrator for `store`.
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Run every step. Only table creation failures are returned; the other
    /// steps log and continue.
    pub fn run(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        self.store.with_conn(|conn| -> Result<()> {
            let before = existing_tables(conn).map_err(db_err("Failed to list tables"))?;
            conn.execute_batch(SCHEMA_SQL)
                .map_err(db_err("Failed to initialize schema"))?;
            report.tables_created = ["books", "authors", "book_authors"]
                .into_iter()
                .filter(|t| !before.iter().any(|b| b.as_str() == *t))
                .map(String::from)
                .collect();
            Ok(())
        })?;

        report.columns_added = self.store.with_conn(add_missing_columns);

        self.store.with_conn(|conn| {
            if let Err(e) = conn.execute_batch(INDEX_SQL) {
                tracing::warn!(error = %e, "Failed to create catalog indexes");
            }
        });

        report.digests_normalized = self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE books SET fileHash = NULL
                 WHERE fileHash IS NOT NULL AND TRIM(fileHash) = ''",
                [],
            )
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to normalize blank digests");
                0
            })
        });

        report.legacy_authors = self.store.with_conn(|conn| match migrate_legacy_authors(conn) {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Legacy author migration rolled back");
                None
            }
        });

        tracing::info!(
            tables_created = report.tables_created.len(),
            columns_added = report.columns_added.len(),
            digests_normalized = report.digests_normalized,
            legacy_authors = report.legacy_authors.is_some(),
            "Schema migration complete"
        );

        Ok(report)
    }
}

fn existing_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    stmt.query_map([], |row| row.get(0))?.collect()
}

/// Column names of a table, via `PRAGMA table_info`.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    stmt.query_map([], |row| row.get::<_, String>(1))?.collect()
}

fn add_missing_columns(conn: &mut Connection) -> Vec<String> {
    let existing = match table_columns(conn, "books") {
        Ok(cols) => cols,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to inspect books columns");
            return Vec::new();
        }
    };

    let mut added = Vec::new();
    for (column, sql_type) in ADDITIVE_COLUMNS {
        if existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            continue;
        }

        match conn.execute_batch(&format!(
            "ALTER TABLE books ADD COLUMN {} {}",
            column, sql_type
        )) {
            Ok(()) => {
                tracing::info!(column = column, "Added column to books table");
                added.push(column.to_string());
            }
            Err(e) => {
                tracing::warn!(column = column, error = %e, "Failed to add column to books table");
            }
        }
    }
    added
}

/// Split legacy author strings into `authors` and `book_authors`.
///
/// Runs only while books exist and no link does, inside one transaction.
/// Each book gets its own savepoint so one bad record is skipped without
/// partial linkage.
fn migrate_legacy_authors(conn: &mut Connection) -> rusqlite::Result<Option<LegacyAuthorStats>> {
    let books: i64 = conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
    let links: i64 = conn.query_row("SELECT COUNT(*) FROM book_authors", [], |row| row.get(0))?;
    if books == 0 || links > 0 {
        return Ok(None);
    }

    tracing::info!(books = books, "Starting legacy author migration");

    let mut tx = conn.transaction()?;
    let legacy: Vec<(String, Value)> = {
        let mut stmt = tx.prepare("SELECT id, author FROM books WHERE author IS NOT NULL")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?
    };

    let mut stats = LegacyAuthorStats::default();
    for (book_id, author) in legacy {
        let raw = match author {
            Value::Text(s) => s,
            other => {
                tracing::warn!(book = %book_id, value = ?other, "Skipping non-text author field");
                stats.skipped += 1;
                continue;
            }
        };

        let names = split_author_names(&raw);
        if names.is_empty() {
            continue;
        }

        let sp = tx.savepoint()?;
        match link_authors(&sp, &book_id, &names) {
            Ok(counts) => {
                sp.commit()?;
                stats.books += 1;
                stats.authors += counts.authors;
                stats.links += counts.links;
            }
            Err(e) => {
                drop(sp);
                tracing::warn!(book = %book_id, error = %e, "Skipping book during author migration");
                stats.skipped += 1;
            }
        }
    }

    tx.commit()?;

    tracing::info!(
        books = stats.books,
        authors = stats.authors,
        links = stats.links,
        skipped = stats.skipped,
        "Legacy author migration completed"
    );
    Ok(Some(stats))
}

/// Insert a book row the way the first released schema did (no links).
#[cfg(test)]
pub(crate) fn insert_legacy_book(store: &Store, id: &str, title: &str, author: Option<&str>) {
    store
        .execute(
            "INSERT INTO books (id, title, author, folderPath, fileName) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, title, author, id, format!("{}.pdf", id)],
        )
        .unwrap();
}
