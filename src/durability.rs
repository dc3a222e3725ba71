//! Throttled and forced snapshot writes of the in-memory catalog.

use crate::db::Store;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Default coalescing window for [`DurabilityCoordinator::request_save`].
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(2000);

/// Decides when the in-memory catalog is written to disk.
///
/// Routine edits call [`request_save`](Self::request_save), which (re)arms
/// an alarm; any number of calls inside the window produce one write.
/// Irrevocable operations call [`force_save`](Self::force_save), which
/// cancels the alarm and writes before returning.
#[derive(Clone)]
pub struct DurabilityCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    catalog_path: PathBuf,
    window: Duration,
    runtime: Handle,
    /// Pending alarm, if any.
    alarm: Mutex<Option<JoinHandle<()>>>,
    /// Held for the whole export + write; alarms and forced saves never overlap.
    flush_lock: Mutex<()>,
    /// Bumped by every request/force/shutdown; an alarm only writes if its
    /// generation is still current.
    generation: AtomicU64,
    closed: AtomicBool,
    dirty: AtomicBool,
    flushes: AtomicU64,
    failures: AtomicU64,
}

impl DurabilityCoordinator {
    /// Coordinator writing `store` to `catalog_path`.
    ///
    /// Must be created inside a Tokio runtime; the alarm runs on it.
    pub fn new(store: Store, catalog_path: impl Into<PathBuf>, window: Duration) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            AppError::Internal(format!("Durability coordinator needs a Tokio runtime: {}", e))
        })?;

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                catalog_path: catalog_path.into(),
                window,
                runtime,
                alarm: Mutex::new(None),
                flush_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                dirty: AtomicBool::new(false),
                flushes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        })
    }

    /// Catalog file written by this coordinator.
    pub fn catalog_path(&self) -> &Path {
        &self.inner.catalog_path
    }

    /// Schedule a write at the end of the coalescing window.
    pub fn request_save(&self) {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            tracing::warn!("Save requested after shutdown, ignoring");
            return;
        }

        inner.dirty.store(true, Ordering::SeqCst);

        let mut alarm = inner.alarm.lock();
        if let Some(previous) = alarm.take() {
            previous.abort();
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let task_inner = Arc::clone(inner);
        *alarm = Some(inner.runtime.spawn(async move {
            tokio::time::sleep(task_inner.window).await;
            task_inner.fire(generation);
        }));

        tracing::trace!(generation = generation, "Save scheduled");
    }

    /// Cancel any pending alarm and write the catalog now.
    pub fn force_save(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(AppError::NotReady("catalog is closed".to_string()));
        }

        inner.cancel_alarm();
        inner.dirty.store(true, Ordering::SeqCst);
        let _guard = inner.flush_lock.lock();
        inner.flush()
    }

    /// Cancel the alarm, write one final snapshot and stop accepting saves.
    ///
    /// The coordinator is closed even if the final write fails.
    pub fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        inner.cancel_alarm();
        let _guard = inner.flush_lock.lock();
        let result = inner.flush();
        match &result {
            Ok(()) => tracing::info!(path = %inner.catalog_path.display(), "Catalog flushed at shutdown"),
            Err(e) => tracing::error!(error = %e, "Final catalog flush failed"),
        }
        result
    }

    /// Whether an alarm is armed and has not fired yet.
    pub fn has_pending(&self) -> bool {
        self.inner
            .alarm
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Whether changes exist that no successful write has covered yet.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Successful writes so far.
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    /// Failed writes so far.
    pub fn failed_flushes(&self) -> u64 {
        self.inner.failures.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for DurabilityCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurabilityCoordinator")
            .field("catalog_path", &self.inner.catalog_path)
            .field("window", &self.inner.window)
            .field("dirty", &self.is_dirty())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Inner {
    fn cancel_alarm(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.alarm.lock().take() {
            handle.abort();
        }
    }

    /// Alarm expiry. Writes only if nothing superseded this alarm.
    fn fire(&self, generation: u64) {
        let _guard = self.flush_lock.lock();
        if self.closed.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation
        {
            return;
        }

        // Failure is already logged and counted; the next save retries.
        let _ = self.flush();
    }

    /// Export and write the snapshot. Caller holds `flush_lock`.
    fn flush(&self) -> Result<()> {
        let started = std::time::Instant::now();
        let result = self
            .store
            .export_snapshot()
            .and_then(|bytes| write_snapshot(&self.catalog_path, &bytes).map(|()| bytes.len()));

        match result {
            Ok(bytes) => {
                self.dirty.store(false, Ordering::SeqCst);
                self.flushes.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    path = %self.catalog_path.display(),
                    bytes = bytes,
                    elapsed = ?started.elapsed(),
                    "Catalog saved"
                );
                Ok(())
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    path = %self.catalog_path.display(),
                    error = %e,
                    "Failed to save catalog, in-memory state kept until the next save"
                );
                Err(e)
            }
        }
    }
}

/// Write `bytes` to `path` without ever exposing a partial file.
///
/// The snapshot goes to a temporary file in the same directory, is synced,
/// then renamed over the old catalog.
pub fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".catalog-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}
