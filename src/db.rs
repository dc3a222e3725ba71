mod books;
mod dedup;
mod migrate;
mod store;

pub use dedup::{ContentDedupIndex, Digest};
pub use migrate::{LegacyAuthorStats, MigrationReport, SchemaMigrator};
pub use store::{Row, Store};

#[cfg(test)]
pub(crate) use migrate::insert_legacy_book;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Column list shared by every query that materializes a [`Book`].
pub(crate) const BOOK_COLUMNS: &str = "id, title, author, description, category, isbn, \
     folderPath, fileName, coverImage, fileSize, pageCount, publisher, year, language, \
     createdAt, updatedAt, fileHash";

/// Book row in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Book ID (UUID v4, assigned at ingestion).
    pub id: String,
    /// Book title.
    pub title: String,
    /// Legacy author display string, names separated by `;`.
    pub author: Option<String>,
    /// Book description.
    pub description: Option<String>,
    /// Category.
    pub category: Option<String>,
    /// ISBN.
    pub isbn: Option<String>,
    /// Folder inside the object store, relative to its root.
    pub folder_path: String,
    /// Name of the book file inside `folder_path`.
    pub file_name: String,
    /// Name of the cover image inside `folder_path`.
    pub cover_image: Option<String>,
    /// File size in bytes.
    pub file_size: Option<i64>,
    /// Page count.
    pub page_count: Option<i64>,
    /// Publisher.
    pub publisher: Option<String>,
    /// Publication year.
    pub year: Option<i64>,
    /// Language code.
    pub language: Option<String>,
    /// Creation timestamp.
    pub created_at: Option<String>,
    /// Last metadata edit timestamp.
    pub updated_at: Option<String>,
    /// Lowercase hex SHA-256 of the file, `None` if never hashed.
    pub file_hash: Option<String>,
}

/// Author row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Surrogate ID.
    pub id: i64,
    /// Unique display name.
    pub name: String,
    /// Biography.
    pub bio: Option<String>,
    /// Photo path.
    pub photo_path: Option<String>,
    /// Creation timestamp.
    pub created_at: Option<String>,
}

/// Link between a book and one of its authors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookAuthor {
    /// Book ID.
    pub book_id: String,
    /// Author ID.
    pub author_id: i64,
    /// Role, `"author"` unless stated otherwise.
    pub role: String,
}

/// Filter and pagination for book listings.
#[derive(Debug, Clone)]
pub struct BookQuery {
    /// Substring matched against title, author and ISBN.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

impl Default for BookQuery {
    fn default() -> Self {
        Self {
            search: None,
            page: 1,
            limit: 50,
        }
    }
}

/// Current time as an RFC 3339 UTC string with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
