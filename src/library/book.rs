//! Book metadata supplied by callers.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Descriptive metadata for a newly ingested book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    /// Book title (falls back to the file stem when blank).
    pub title: String,
    /// Author display string, names separated by `;`.
    pub author: Option<String>,
    /// Description or summary.
    pub description: Option<String>,
    /// Category.
    pub category: Option<String>,
    /// ISBN, normalized to ISBN-13 when possible.
    pub isbn: Option<String>,
    /// Publisher.
    pub publisher: Option<String>,
    /// Publication year.
    pub year: Option<i64>,
    /// Language code.
    pub language: Option<String>,
    /// Page count.
    pub page_count: Option<i64>,
}

/// Partial metadata edit. `None` leaves a field untouched; a blank string
/// clears an optional text field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookUpdate {
    /// New title (must not be blank).
    pub title: Option<String>,
    /// New author display string.
    pub author: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New category.
    pub category: Option<String>,
    /// New ISBN.
    pub isbn: Option<String>,
    /// New publisher.
    pub publisher: Option<String>,
    /// New publication year.
    pub year: Option<i64>,
    /// New language code.
    pub language: Option<String>,
    /// New page count.
    pub page_count: Option<i64>,
}

impl BookUpdate {
    /// Whether the edit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.isbn.is_none()
            && self.publisher.is_none()
            && self.year.is_none()
            && self.language.is_none()
            && self.page_count.is_none()
    }

    /// Reject edits the catalog cannot store.
    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title
            && title.trim().is_empty()
        {
            return Err(AppError::InvalidFormat("Title cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Split an author display string into individual names.
///
/// Names are separated by `;`, trimmed, and blanks are dropped. Repeated
/// names keep their first position.
pub fn split_author_names(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(';').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Trim an optional text field, mapping blanks to `None`.
pub fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
