/// Caller-supplied book metadata and author parsing.
pub mod book;
/// ISBN normalization.
pub mod isbn;
/// Per-book file folders.
pub mod objects;

pub use objects::ObjectStore;
