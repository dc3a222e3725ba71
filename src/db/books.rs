use crate::db::*;
use crate::error::{Result, db_err};
use crate::library::book::{BookUpdate, clean_text, split_author_names};
use rusqlite::types::{ToSql, ValueRef};
use rusqlite::{Connection, OptionalExtension, params};

/// Rows created while linking a book to its authors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkCounts {
    pub authors: usize,
    pub links: usize,
}

/// Insert-if-absent every author of `names` and link them to `book_id`.
pub(crate) fn link_authors(
    conn: &Connection,
    book_id: &str,
    names: &[String],
) -> rusqlite::Result<LinkCounts> {
    let now = now_timestamp();
    let mut insert_author =
        conn.prepare_cached("INSERT OR IGNORE INTO authors (name, createdAt) VALUES (?1, ?2)")?;
    let mut find_author = conn.prepare_cached("SELECT id FROM authors WHERE name = ?1")?;
    let mut link = conn.prepare_cached(
        "INSERT OR IGNORE INTO book_authors (book_id, author_id) VALUES (?1, ?2)",
    )?;

    let mut counts = LinkCounts::default();
    for name in names {
        counts.authors += insert_author.execute(params![name, now])?;
        let author_id: i64 = find_author.query_row(params![name], |row| row.get(0))?;
        counts.links += link.execute(params![book_id, author_id])?;
    }
    Ok(counts)
}

/// Decode a loosely-typed text column.
fn opt_text(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}

/// Decode a loosely-typed integer column. Legacy catalogs may hold `''` or
/// numeric text in integer columns.
fn opt_int(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<i64>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(f) => Some(f as i64),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse().ok()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}

/// Helper to convert a row selected with [`BOOK_COLUMNS`] to a Book.
pub(crate) fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: opt_text(row, 1)?.unwrap_or_default(),
        author: opt_text(row, 2)?,
        description: opt_text(row, 3)?,
        category: opt_text(row, 4)?,
        isbn: opt_text(row, 5)?,
        folder_path: opt_text(row, 6)?.unwrap_or_default(),
        file_name: opt_text(row, 7)?.unwrap_or_default(),
        cover_image: opt_text(row, 8)?,
        file_size: opt_int(row, 9)?,
        page_count: opt_int(row, 10)?,
        publisher: opt_text(row, 11)?,
        year: opt_int(row, 12)?,
        language: opt_text(row, 13)?,
        created_at: opt_text(row, 14)?,
        updated_at: opt_text(row, 15)?,
        file_hash: opt_text(row, 16)?.filter(|h| !h.trim().is_empty()),
    })
}

fn search_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s))
}

impl Store {
    // ========== BOOK OPERATIONS ==========

    /// Insert a book and link its authors in one transaction.
    pub fn insert_book(&self, book: &Book) -> Result<()> {
        let names = book
            .author
            .as_deref()
            .map(split_author_names)
            .unwrap_or_default();

        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(db_err("Failed to begin transaction"))?;

            tx.execute(
                &format!(
                    "INSERT INTO books ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    BOOK_COLUMNS
                ),
                params![
                    book.id,
                    book.title,
                    book.author,
                    book.description,
                    book.category,
                    book.isbn,
                    book.folder_path,
                    book.file_name,
                    book.cover_image,
                    book.file_size,
                    book.page_count,
                    book.publisher,
                    book.year,
                    book.language,
                    book.created_at,
                    book.updated_at,
                    book.file_hash,
                ],
            )
            .map_err(db_err("Failed to insert book"))?;

            link_authors(&tx, &book.id, &names).map_err(db_err("Failed to link authors"))?;

            tx.commit().map_err(db_err("Failed to commit book"))
        })
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<Book>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
                params![id],
                row_to_book,
            )
            .optional()
            .map_err(db_err("Failed to get book"))
        })
    }

    /// List books, most recently edited first.
    pub fn list_books(&self, query: &BookQuery) -> Result<Vec<Book>> {
        let pattern = search_pattern(query.search.as_deref());
        let limit = i64::from(query.limit.max(1));
        let offset = i64::from(query.page.max(1) - 1) * limit;

        let filter = if pattern.is_some() {
            "WHERE title LIKE ?3 OR author LIKE ?3 OR isbn LIKE ?3"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM books {}
             ORDER BY COALESCE(updatedAt, createdAt) DESC, title
             LIMIT ?1 OFFSET ?2",
            BOOK_COLUMNS, filter
        );

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(db_err("Failed to prepare query"))?;

            let rows = match &pattern {
                Some(p) => stmt.query_map(params![limit, offset, p], row_to_book),
                None => stmt.query_map(params![limit, offset], row_to_book),
            };

            rows.map_err(db_err("Failed to list books"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("Failed to collect books"))
        })
    }

    /// Count books matching an optional search term.
    pub fn count_books(&self, search: Option<&str>) -> Result<i64> {
        let pattern = search_pattern(search);
        self.with_conn(|conn| {
            match &pattern {
                Some(p) => conn.query_row(
                    "SELECT COUNT(*) FROM books WHERE title LIKE ?1 OR author LIKE ?1 OR isbn LIKE ?1",
                    params![p],
                    |row| row.get(0),
                ),
                None => conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0)),
            }
            .map_err(db_err("Failed to count books"))
        })
    }

    /// Apply a metadata edit and bump `updatedAt`.
    ///
    /// When the author string is part of the edit, the book's author links
    /// are rebuilt in the same transaction. Returns `None` if the book does
    /// not exist.
    pub fn update_book(&self, id: &str, update: &BookUpdate) -> Result<Option<Book>> {
        update.validate()?;

        let text = |v: &Option<String>| v.as_ref().map(|s| clean_text(Some(s.as_str())));
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(title) = &update.title {
            sets.push("title");
            values.push(Box::new(title.trim().to_string()));
        }
        for (column, value) in [
            ("author", text(&update.author)),
            ("description", text(&update.description)),
            ("category", text(&update.category)),
            ("isbn", text(&update.isbn)),
            ("publisher", text(&update.publisher)),
            ("language", text(&update.language)),
        ] {
            if let Some(value) = value {
                sets.push(column);
                values.push(Box::new(value));
            }
        }
        if let Some(year) = update.year {
            sets.push("year");
            values.push(Box::new(year));
        }
        if let Some(pages) = update.page_count {
            sets.push("pageCount");
            values.push(Box::new(pages));
        }

        sets.push("updatedAt");
        values.push(Box::new(now_timestamp()));
        values.push(Box::new(id.to_string()));

        let assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        let sql = format!(
            "UPDATE books SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );

        let relink = update
            .author
            .as_deref()
            .map(split_author_names);

        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(db_err("Failed to begin transaction"))?;

            let changed = tx
                .execute(&sql, rusqlite::params_from_iter(values.iter()))
                .map_err(db_err("Failed to update book"))?;
            if changed == 0 {
                return Ok(None);
            }

            if let Some(names) = &relink {
                tx.execute("DELETE FROM book_authors WHERE book_id = ?1", params![id])
                    .map_err(db_err("Failed to clear author links"))?;
                link_authors(&tx, id, names).map_err(db_err("Failed to link authors"))?;
            }

            let book = tx
                .query_row(
                    &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
                    params![id],
                    row_to_book,
                )
                .map_err(db_err("Failed to reload book"))?;

            tx.commit().map_err(db_err("Failed to commit edit"))?;
            Ok(Some(book))
        })
    }

    /// Set or clear the cover image name. Bumps `updatedAt`.
    pub fn set_cover_image(&self, id: &str, cover: Option<&str>) -> Result<bool> {
        let rows = self.execute(
            "UPDATE books SET coverImage = ?1, updatedAt = ?2 WHERE id = ?3",
            params![cover, now_timestamp(), id],
        )?;
        Ok(rows > 0)
    }

    /// Set or clear the content digest of a book.
    pub fn set_file_hash(&self, id: &str, digest: Option<&Digest>) -> Result<bool> {
        let rows = self.execute(
            "UPDATE books SET fileHash = ?1 WHERE id = ?2",
            params![digest.map(Digest::as_str), id],
        )?;
        Ok(rows > 0)
    }

    /// Delete a book. Author links cascade; authors themselves stay.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let rows = self.execute("DELETE FROM books WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ========== AUTHOR OPERATIONS ==========

    /// List all authors by name.
    pub fn list_authors(&self) -> Result<Vec<Author>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, bio, photoPath, createdAt FROM authors ORDER BY name")
                .map_err(db_err("Failed to prepare query"))?;

            stmt.query_map([], row_to_author)
                .map_err(db_err("Failed to list authors"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("Failed to collect authors"))
        })
    }

    /// Authors of a book, in link order.
    pub fn authors_of(&self, book_id: &str) -> Result<Vec<Author>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT a.id, a.name, a.bio, a.photoPath, a.createdAt
                     FROM book_authors ba JOIN authors a ON a.id = ba.author_id
                     WHERE ba.book_id = ?1
                     ORDER BY ba.rowid",
                )
                .map_err(db_err("Failed to prepare query"))?;

            stmt.query_map(params![book_id], row_to_author)
                .map_err(db_err("Failed to get book authors"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("Failed to collect authors"))
        })
    }

    /// Raw author links of a book.
    pub fn book_author_links(&self, book_id: &str) -> Result<Vec<BookAuthor>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT book_id, author_id, COALESCE(role, 'author')
                     FROM book_authors WHERE book_id = ?1 ORDER BY rowid",
                )
                .map_err(db_err("Failed to prepare query"))?;

            stmt.query_map(params![book_id], |row| {
                Ok(BookAuthor {
                    book_id: row.get(0)?,
                    author_id: row.get(1)?,
                    role: row.get(2)?,
                })
            })
            .map_err(db_err("Failed to get author links"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Failed to collect author links"))
        })
    }
}

fn row_to_author(row: &rusqlite::Row<'_>) -> rusqlite::Result<Author> {
    Ok(Author {
        id: row.get(0)?,
        name: opt_text(row, 1)?.unwrap_or_default(),
        bio: opt_text(row, 2)?,
        photo_path: opt_text(row, 3)?,
        created_at: opt_text(row, 4)?,
    })
}
