//! Content-digest lookup used to catch duplicate ingestion.

use crate::db::books::row_to_book;
use crate::db::{BOOK_COLUMNS, Book, Store};
use crate::error::{AppError, Result, db_err};
use rusqlite::{OptionalExtension, params};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// SHA-256 of a file's full content, as 64 lowercase hex characters.
///
/// A `Digest` is never empty: "never hashed" is represented by the absence
/// of a digest (`None` / SQL `NULL`), not by an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Digest of an in-memory payload.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Digest of everything readable from `reader`.
    pub fn of_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Digest of a file on disk.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        Self::of_reader(std::fs::File::open(path)?)
    }

    /// Parse a stored or caller-supplied digest.
    ///
    /// Blank input means "no digest" and yields `Ok(None)`. Anything else
    /// must be 64 hex characters.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if raw.len() != 64 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::InvalidFormat(format!(
                "Not a SHA-256 hex digest: {}",
                raw
            )));
        }
        Ok(Some(Self(raw.to_ascii_lowercase())))
    }

    /// Hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest-keyed lookup over the catalog.
///
/// Advisory only: a hit tells the caller the content is already present,
/// it does not stop the same digest from being inserted again.
#[derive(Clone)]
pub struct ContentDedupIndex {
    store: Store,
}

impl ContentDedupIndex {
    /// Index over `store`.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Book already holding this content, earliest ingestion first.
    pub fn lookup(&self, digest: &Digest) -> Result<Option<Book>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM books WHERE fileHash = ?1
                     ORDER BY createdAt, rowid LIMIT 1",
                    BOOK_COLUMNS
                ),
                params![digest.as_str()],
                row_to_book,
            )
            .optional()
            .map_err(db_err("Failed to look up digest"))
        })
    }

    /// Lookup by raw string. Blank or absent input never matches.
    pub fn lookup_str(&self, raw: Option<&str>) -> Result<Option<Book>> {
        match raw.map(Digest::parse).transpose()?.flatten() {
            Some(digest) => self.lookup(&digest),
            None => Ok(None),
        }
    }
}
