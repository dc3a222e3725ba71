//! Object store: one folder per book holding the original file and cover.

use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// Extensions accepted for ingested book files.
pub const BOOK_EXTENSIONS: &[&str] = &["pdf", "epub"];

/// Extensions accepted for cover images.
pub const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Directory tree of original files and cover images.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Object store rooted at `root` (created on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder of one book.
    pub fn book_dir(&self, book_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_component(book_id)?))
    }

    /// Write the original file of a book. Returns the stored file name.
    pub fn write_book_file(&self, book_id: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let file_name = sanitize_file_name(file_name)?;
        let dir = self.book_dir(book_id)?;
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(&file_name), bytes)?;

        tracing::debug!(book = book_id, file = %file_name, bytes = bytes.len(), "Stored book file");
        Ok(file_name)
    }

    /// Write the cover image of a book. Returns the stored file name.
    pub fn write_cover(&self, book_id: &str, extension: &str, bytes: &[u8]) -> Result<String> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if !COVER_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AppError::InvalidFormat(format!(
                "Unsupported cover type: {}",
                extension
            )));
        }

        let dir = self.book_dir(book_id)?;
        std::fs::create_dir_all(&dir)?;
        let cover_name = format!("cover.{}", ext);
        std::fs::write(dir.join(&cover_name), bytes)?;

        tracing::debug!(book = book_id, cover = %cover_name, "Stored cover image");
        Ok(cover_name)
    }

    /// Absolute path of a file referenced by `folderPath`/`fileName`.
    pub fn resolve(&self, folder_path: &str, file_name: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in Path::new(folder_path).components() {
            match part {
                std::path::Component::Normal(p) => path.push(p),
                std::path::Component::CurDir => {}
                _ => {
                    return Err(AppError::InvalidFormat(format!(
                        "Folder path escapes the object store: {}",
                        folder_path
                    )));
                }
            }
        }
        Ok(path.join(checked_component(file_name)?))
    }

    /// Remove the folder of a book. Missing folders are not an error.
    pub fn remove_book_dir(&self, book_id: &str) -> Result<bool> {
        let dir = self.book_dir(book_id)?;
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        Ok(true)
    }
}

/// Check that a book file name has an accepted extension.
pub fn check_book_extension(file_name: &str) -> Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if BOOK_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(AppError::InvalidFormat(format!(
            "Invalid file type: {}. Only PDF and EPUB are allowed.",
            file_name
        )))
    }
}

/// Keep only the final path component of a caller-supplied file name.
pub fn sanitize_file_name(file_name: &str) -> Result<String> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .unwrap_or_default();

    if name.is_empty() {
        return Err(AppError::InvalidFormat(format!(
            "Invalid file name: {:?}",
            file_name
        )));
    }
    Ok(name.to_string())
}

fn checked_component(part: &str) -> Result<&str> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
        return Err(AppError::InvalidFormat(format!(
            "Invalid path component: {:?}",
            part
        )));
    }
    Ok(part)
}
