use rusqlite::ErrorCode;
use thiserror::Error;

/// Main error type for the catalog.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error.
    #[error("Book not found: {0}")]
    NotFound(String),

    /// Invalid input (file type, digest, identifier).
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Statement failed (malformed SQL, type mismatch, engine error).
    #[error("Database error: {0}")]
    Database(String),

    /// Constraint violation (unique, foreign key, not null).
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Storage directories could not be resolved or created.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Catalog file exists but is not a loadable snapshot.
    #[error("Corrupt catalog snapshot: {0}")]
    CorruptSnapshot(String),

    /// Catalog is not open (closed, still opening, or failed).
    #[error("Catalog not ready: {0}")]
    NotReady(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error must abort initialization of the whole process.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Storage(_) | AppError::CorruptSnapshot(_) | AppError::Config(_)
        )
    }

    /// Wrap a SQLite error with context, keeping constraint violations apart.
    pub fn from_sqlite(context: &str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                AppError::Constraint(format!("{}: {}", context, err))
            }
            _ => AppError::Database(format!("{}: {}", context, err)),
        }
    }
}

/// Shorthand for `map_err(db_err("..."))` on rusqlite results.
pub fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |e| AppError::from_sqlite(context, e)
}

/// Result type alias for the catalog.
pub type Result<T> = std::result::Result<T, AppError>;
