use crate::durability::DEFAULT_THROTTLE;
use crate::storage::{DEFAULT_CATALOG_NAME, DEFAULT_SEARCH_DEPTH};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Portable local book catalog.
#[derive(Parser, Debug, Clone)]
#[command(name = "babi-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BABI_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the catalog (skips discovery).
    #[arg(short, long, env = "BABI_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show resolved storage and catalog statistics (default).
    Status,

    /// Create default config and an empty catalog.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Run schema migration and report what changed.
    Migrate,

    /// Book management commands.
    Book {
        /// Book subcommand action.
        #[command(subcommand)]
        action: BookCommand,
    },

    /// Author commands.
    Author {
        /// Author subcommand action.
        #[command(subcommand)]
        action: AuthorCommand,
    },
}

/// Book management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum BookCommand {
    /// Ingest a PDF or EPUB file.
    Add {
        /// File to ingest.
        file: PathBuf,
        /// Title (defaults to the file name).
        #[arg(short, long)]
        title: Option<String>,
        /// Authors, separated by ';'.
        #[arg(short, long)]
        author: Option<String>,
        /// Description.
        #[arg(long)]
        description: Option<String>,
        /// Category.
        #[arg(long)]
        category: Option<String>,
        /// ISBN.
        #[arg(long)]
        isbn: Option<String>,
        /// Publisher.
        #[arg(long)]
        publisher: Option<String>,
        /// Publication year.
        #[arg(long)]
        year: Option<i64>,
        /// Language code.
        #[arg(long)]
        language: Option<String>,
        /// Page count.
        #[arg(long)]
        pages: Option<i64>,
        /// Cover image (jpg or png).
        #[arg(long)]
        cover: Option<PathBuf>,
        /// Ingest even if the same content is already in the catalog.
        #[arg(long)]
        force: bool,
    },

    /// List books, most recently edited first.
    List {
        /// Filter on title, author or ISBN.
        #[arg(short, long)]
        search: Option<String>,
        /// Page number.
        #[arg(long, default_value = "1")]
        page: u32,
        /// Page size.
        #[arg(long, default_value = "50")]
        limit: u32,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show one book.
    Show {
        /// Book ID.
        id: String,
    },

    /// Edit book metadata (empty string clears a field).
    Edit {
        /// Book ID.
        id: String,
        /// New title.
        #[arg(short, long)]
        title: Option<String>,
        /// New authors, separated by ';'.
        #[arg(short, long)]
        author: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// New category.
        #[arg(long)]
        category: Option<String>,
        /// New ISBN.
        #[arg(long)]
        isbn: Option<String>,
        /// New publisher.
        #[arg(long)]
        publisher: Option<String>,
        /// New publication year.
        #[arg(long)]
        year: Option<i64>,
        /// New language code.
        #[arg(long)]
        language: Option<String>,
        /// New page count.
        #[arg(long)]
        pages: Option<i64>,
    },

    /// Replace the cover image of a book.
    Cover {
        /// Book ID.
        id: String,
        /// Cover image (jpg or png).
        image: PathBuf,
    },

    /// Delete a book and its files.
    Del {
        /// Book ID.
        id: String,
    },

    /// Check whether a file is already in the catalog.
    Check {
        /// File to check.
        file: PathBuf,
    },

    /// Recompute the content digest of a stored book.
    Rehash {
        /// Book ID.
        id: String,
    },
}

/// Author subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum AuthorCommand {
    /// List all authors.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Durability configuration.
    #[serde(default)]
    pub durability: DurabilityConfig,

    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory (skips discovery when set).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Object-store root (defaults to `uploads` beside the data directory).
    #[serde(default)]
    pub objects_dir: Option<PathBuf>,

    /// Catalog file name.
    #[serde(default = "default_catalog_name")]
    pub catalog_name: String,

    /// Ancestor levels searched for a shared catalog.
    #[serde(default = "default_search_depth")]
    pub search_depth: usize,

    /// Force standard-install detection on or off.
    #[serde(default)]
    pub standard_install: Option<bool>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            objects_dir: None,
            catalog_name: default_catalog_name(),
            search_depth: default_search_depth(),
            standard_install: None,
        }
    }
}

fn default_catalog_name() -> String {
    DEFAULT_CATALOG_NAME.to_string()
}

fn default_search_depth() -> usize {
    DEFAULT_SEARCH_DEPTH
}

/// Durability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurabilityConfig {
    /// Coalescing window for throttled saves, in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
        }
    }
}

fn default_throttle_ms() -> u64 {
    DEFAULT_THROTTLE.as_millis() as u64
}

impl DurabilityConfig {
    /// Coalescing window.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "babi_rs=info".to_string()
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("babi-rs.toml"),
            dirs::config_dir()
                .map(|p| p.join("babi-rs").join("config.toml"))
                .unwrap_or_default(),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# babi-rs configuration

[storage]
# Fixed data directory; when unset the catalog is discovered next to the
# executable (portable media) or in the per-user data directory.
# data_dir = "/media/usb/data"
# objects_dir = "/media/usb/uploads"
catalog_name = "babi.db"
# Parent directories searched for a shared data/<catalog_name>
search_depth = 3
# Override standard-install detection (true/false)
# standard_install = false

[durability]
# Coalescing window for routine saves, in milliseconds
throttle_ms = 2000

[log]
# Used when RUST_LOG is not set
filter = "babi_rs=info"
"#
        .to_string()
    }
}
