//! Resolves where the catalog file and object store live.
//!
//! Four deployment shapes are supported, checked in order:
//!
//! 1. an explicit data directory (CLI flag, env var, or config file);
//! 2. a shared root on removable media: some ancestor of the executable
//!    (up to three levels) already holds `data/<catalog>`;
//! 3. portable mode: a `data` directory beside the executable, or any
//!    install outside the platform's standard program locations;
//! 4. the per-user application-data directory.

use crate::error::{AppError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default catalog file name.
pub const DEFAULT_CATALOG_NAME: &str = "babi.db";

/// Default number of ancestor levels searched for a shared catalog.
pub const DEFAULT_SEARCH_DEPTH: usize = 3;

/// Application directory name under the per-user data directory.
const APP_DIR_NAME: &str = "babi";

/// Which rule picked the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Explicit data directory.
    Override,
    /// Existing catalog found above the executable.
    SharedRoot,
    /// `data` directory beside the executable.
    Portable,
    /// Per-user application-data directory.
    Standard,
}

/// Resolved locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageLayout {
    /// Directory holding the catalog file.
    pub data_dir: PathBuf,
    /// Catalog snapshot file.
    pub catalog_path: PathBuf,
    /// Root of the per-book file folders.
    pub object_root: PathBuf,
    /// Rule that produced this layout.
    pub mode: StorageMode,
}

/// Execution context the layout is resolved from.
#[derive(Debug, Clone, Default)]
pub struct LocatorContext {
    /// Explicit data directory; wins over everything else.
    pub data_dir_override: Option<PathBuf>,
    /// Explicit object-store root (used with any mode).
    pub objects_dir_override: Option<PathBuf>,
    /// Directory containing the running executable.
    pub exe_dir: PathBuf,
    /// Whether the executable sits in a standard install location.
    pub standard_install: bool,
    /// Per-user application-data directory (`None` if the platform has none).
    pub user_data_dir: Option<PathBuf>,
}

impl LocatorContext {
    /// Context of the current process.
    pub fn from_env(
        data_dir_override: Option<PathBuf>,
        objects_dir_override: Option<PathBuf>,
        standard_install: Option<bool>,
    ) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| AppError::Storage(format!("Cannot locate executable: {}", e)))?;
        let exe_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| AppError::Storage(format!("Executable has no parent: {}", exe.display())))?;

        let standard_install = standard_install.unwrap_or_else(|| is_standard_install(&exe_dir));

        Ok(Self {
            data_dir_override,
            objects_dir_override,
            exe_dir,
            standard_install,
            user_data_dir: dirs::data_dir().map(|d| d.join(APP_DIR_NAME)),
        })
    }
}

/// Resolves a [`StorageLayout`] from a [`LocatorContext`].
#[derive(Debug, Clone)]
pub struct StorageLocator {
    catalog_name: String,
    search_depth: usize,
}

impl Default for StorageLocator {
    fn default() -> Self {
        Self::new(DEFAULT_CATALOG_NAME, DEFAULT_SEARCH_DEPTH)
    }
}

impl StorageLocator {
    /// Locator for `catalog_name`, searching `search_depth` ancestor levels.
    pub fn new(catalog_name: impl Into<String>, search_depth: usize) -> Self {
        Self {
            catalog_name: catalog_name.into(),
            search_depth,
        }
    }

    /// Pick the layout and create its directories.
    ///
    /// Never moves or deletes an existing catalog. Failing to create a
    /// directory is fatal.
    pub fn resolve(&self, ctx: &LocatorContext) -> Result<StorageLayout> {
        let layout = self.select(ctx)?;

        for dir in [&layout.data_dir, &layout.object_root] {
            std::fs::create_dir_all(dir).map_err(|e| {
                AppError::Storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        tracing::info!(
            mode = ?layout.mode,
            catalog = %layout.catalog_path.display(),
            objects = %layout.object_root.display(),
            "Resolved storage layout"
        );
        Ok(layout)
    }

    /// Pick the layout without touching the filesystem beyond reads.
    pub fn select(&self, ctx: &LocatorContext) -> Result<StorageLayout> {
        if let Some(dir) = &ctx.data_dir_override {
            return Ok(self.layout(dir.clone(), dir.join("uploads"), StorageMode::Override, ctx));
        }

        let base = bundle_parent(&ctx.exe_dir);

        if let Some(root) = self.find_shared_root(&base) {
            tracing::info!(root = %root.display(), "Found shared catalog above executable");
            return Ok(self.layout(
                root.join("data"),
                root.join("uploads"),
                StorageMode::SharedRoot,
                ctx,
            ));
        }

        let local_data = base.join("data");
        if local_data.is_dir() || !ctx.standard_install {
            return Ok(self.layout(local_data, base.join("uploads"), StorageMode::Portable, ctx));
        }

        let user_dir = ctx.user_data_dir.clone().ok_or_else(|| {
            AppError::Storage("No per-user application data directory on this platform".to_string())
        })?;
        let objects = user_dir.join("uploads");
        Ok(self.layout(user_dir, objects, StorageMode::Standard, ctx))
    }

    /// First ancestor of `base` (1..=depth levels up) holding `data/<catalog>`.
    fn find_shared_root(&self, base: &Path) -> Option<PathBuf> {
        base.ancestors()
            .skip(1)
            .take(self.search_depth)
            .find(|dir| dir.join("data").join(&self.catalog_name).is_file())
            .map(Path::to_path_buf)
    }

    fn layout(
        &self,
        data_dir: PathBuf,
        object_root: PathBuf,
        mode: StorageMode,
        ctx: &LocatorContext,
    ) -> StorageLayout {
        StorageLayout {
            catalog_path: data_dir.join(&self.catalog_name),
            object_root: ctx.objects_dir_override.clone().unwrap_or(object_root),
            data_dir,
            mode,
        }
    }
}

/// Directory containing a macOS `.app` bundle when the executable lives in
/// `Foo.app/Contents/MacOS`, otherwise `exe_dir` itself.
pub fn bundle_parent(exe_dir: &Path) -> PathBuf {
    let mut parts = exe_dir.ancestors();
    let macos = parts.next();
    let contents = parts.next();
    let bundle = parts.next();

    match (macos, contents, bundle) {
        (Some(m), Some(c), Some(b))
            if m.file_name().is_some_and(|n| n == "MacOS")
                && c.file_name().is_some_and(|n| n == "Contents")
                && b.extension().is_some_and(|e| e == "app") =>
        {
            b.parent().map(Path::to_path_buf).unwrap_or_else(|| b.to_path_buf())
        }
        _ => exe_dir.to_path_buf(),
    }
}

/// Whether `exe_dir` is a standard program location for this platform.
pub fn is_standard_install(exe_dir: &Path) -> bool {
    let path = exe_dir.to_string_lossy();
    ["Program Files", "AppData", "/Applications"]
        .iter()
        .any(|marker| path.contains(marker))
        || path.starts_with("/usr/")
        || path.starts_with("/opt/")
}
