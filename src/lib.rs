//! babi-rs: a portable, single-user book catalog.
//!
//! The catalog is a SQLite database held entirely in memory and written
//! back to a single file as a snapshot. Original book files and covers live
//! in a per-book folder next to it, so the whole library can travel on a
//! removable drive.
//!
//! # Features
//!
//! - Storage discovery: explicit directory, shared root on removable media,
//!   portable install, or the per-user data directory
//! - Throttled snapshot writes for routine edits, forced writes for
//!   ingestion and deletion
//! - Additive schema migration and legacy author splitting
//! - Duplicate detection by SHA-256 content digest
//! - ISBN-10 to ISBN-13 normalization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Catalog context and host operations.
pub mod catalog;
/// Configuration and CLI.
pub mod config;
/// Relational store, migration and dedup index.
pub mod db;
/// Snapshot write scheduling.
pub mod durability;
/// Error types.
pub mod error;
/// Book metadata and object store.
pub mod library;
/// Storage location discovery.
pub mod storage;

#[cfg(test)]
mod tests;

pub use catalog::{Catalog, CatalogState, IngestOutcome, IngestRequest};
pub use config::{Cli, Command, Config};
pub use db::{Book, Digest, Store};
pub use durability::DurabilityCoordinator;
pub use error::{AppError, Result};
pub use storage::{LocatorContext, StorageLayout, StorageLocator};
