//! Catalog context: owns the store, the durability coordinator and the
//! object store, and gates every operation on the catalog being open.

use crate::db::{
    Author, Book, BookQuery, ContentDedupIndex, Digest, MigrationReport, SchemaMigrator, Store,
    now_timestamp,
};
use crate::durability::DurabilityCoordinator;
use crate::error::{AppError, Result};
use crate::library::ObjectStore;
use crate::library::book::{BookMetadata, BookUpdate, clean_text};
use crate::library::isbn;
use crate::library::objects::check_book_extension;
use crate::storage::StorageLayout;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogState {
    /// Not opened yet, or shut down.
    Closed,
    /// Loading and migrating.
    Opening,
    /// Accepting operations.
    Ready,
    /// The last open attempt failed.
    Failed,
}

/// A cover image supplied with an ingestion.
#[derive(Debug, Clone)]
pub struct CoverImage {
    /// File extension (`jpg`, `jpeg` or `png`).
    pub extension: String,
    /// Image bytes.
    pub bytes: Vec<u8>,
}

/// One file to add to the catalog.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Original file name; only its final component is kept.
    pub file_name: String,
    /// File content.
    pub bytes: Vec<u8>,
    /// Precomputed digest; computed from `bytes` when absent.
    pub digest: Option<Digest>,
    /// Descriptive metadata.
    pub metadata: BookMetadata,
    /// Optional cover image.
    pub cover: Option<CoverImage>,
    /// Store the file even if the same content is already cataloged.
    pub allow_duplicate: bool,
}

impl IngestRequest {
    /// Request for `bytes` named `file_name`, with empty metadata.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            digest: None,
            metadata: BookMetadata::default(),
            cover: None,
            allow_duplicate: false,
        }
    }
}

/// Result of [`Catalog::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new book was stored.
    Ingested(Book),
    /// The content is already cataloged; nothing was written.
    Duplicate(Book),
}

struct Services {
    store: Store,
    durability: DurabilityCoordinator,
    dedup: ContentDedupIndex,
    objects: ObjectStore,
}

enum Phase {
    Closed,
    Opening,
    Ready(Arc<Services>),
    Failed(String),
}

/// The book catalog of one storage layout.
pub struct Catalog {
    layout: StorageLayout,
    throttle: Duration,
    phase: Mutex<Phase>,
    phase_changed: Condvar,
    /// Serializes compound mutations (lookup, file writes, insert, flush).
    writer: Mutex<()>,
}

impl Catalog {
    /// Closed catalog over `layout`. Call [`open`](Self::open) before use.
    pub fn new(layout: StorageLayout, throttle: Duration) -> Self {
        Self {
            layout,
            throttle,
            phase: Mutex::new(Phase::Closed),
            phase_changed: Condvar::new(),
            writer: Mutex::new(()),
        }
    }

    /// Load the snapshot, migrate it and start accepting operations.
    ///
    /// A migrated or newly created catalog is written to disk before this
    /// returns. Opening an already open catalog is a no-op.
    pub fn open(&self) -> Result<MigrationReport> {
        {
            let mut phase = self.phase.lock();
            while matches!(*phase, Phase::Opening) {
                self.phase_changed.wait(&mut phase);
            }
            if matches!(*phase, Phase::Ready(_)) {
                return Ok(MigrationReport::default());
            }
            *phase = Phase::Opening;
        }

        let result = self.load();

        let mut phase = self.phase.lock();
        let outcome = match result {
            Ok((services, report)) => {
                *phase = Phase::Ready(Arc::new(services));
                tracing::info!(path = %self.layout.catalog_path.display(), "Catalog ready");
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open catalog");
                *phase = Phase::Failed(e.to_string());
                Err(e)
            }
        };
        self.phase_changed.notify_all();
        outcome
    }

    fn load(&self) -> Result<(Services, MigrationReport)> {
        let catalog_path = &self.layout.catalog_path;
        let existed = catalog_path.is_file();

        let store = Store::open(catalog_path)?;
        let report = SchemaMigrator::new(&store).run()?;
        let durability =
            DurabilityCoordinator::new(store.clone(), catalog_path.clone(), self.throttle)?;

        if report.changed() || !existed {
            durability.force_save()?;
        }

        Ok((
            Services {
                dedup: ContentDedupIndex::new(store.clone()),
                objects: ObjectStore::new(self.layout.object_root.clone()),
                store,
                durability,
            },
            report,
        ))
    }

    /// Services of an open catalog. Waits while the catalog is opening.
    fn services(&self) -> Result<Arc<Services>> {
        let mut phase = self.phase.lock();
        while matches!(*phase, Phase::Opening) {
            self.phase_changed.wait(&mut phase);
        }
        match &*phase {
            Phase::Ready(services) => Ok(Arc::clone(services)),
            Phase::Closed => Err(AppError::NotReady("catalog is closed".to_string())),
            Phase::Failed(reason) => Err(AppError::NotReady(format!(
                "catalog failed to open: {}",
                reason
            ))),
            Phase::Opening => Err(AppError::NotReady("catalog is opening".to_string())),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CatalogState {
        match &*self.phase.lock() {
            Phase::Closed => CatalogState::Closed,
            Phase::Opening => CatalogState::Opening,
            Phase::Ready(_) => CatalogState::Ready,
            Phase::Failed(_) => CatalogState::Failed,
        }
    }

    /// Storage layout this catalog was created with.
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Underlying store of the open catalog.
    pub fn store(&self) -> Result<Store> {
        Ok(self.services()?.store.clone())
    }

    /// Durability coordinator of the open catalog.
    pub fn durability(&self) -> Result<DurabilityCoordinator> {
        Ok(self.services()?.durability.clone())
    }

    /// Add a file to the catalog.
    ///
    /// Content already present is reported as [`IngestOutcome::Duplicate`]
    /// without touching the object store or the catalog, unless the request
    /// allows duplicates. Files written for a book whose insert fails are
    /// removed again.
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let svc = self.services()?;
        let _writer = self.writer.lock();

        check_book_extension(&request.file_name)?;
        let digest = request
            .digest
            .clone()
            .unwrap_or_else(|| Digest::of_bytes(&request.bytes));

        if !request.allow_duplicate
            && let Some(existing) = svc.dedup.lookup(&digest)?
        {
            tracing::info!(
                file = %request.file_name,
                existing = %existing.id,
                "Content already in catalog, skipping"
            );
            return Ok(IngestOutcome::Duplicate(existing));
        }

        let id = Uuid::new_v4().to_string();
        let book = match store_new_book(&svc, &id, &request, &digest) {
            Ok(book) => book,
            Err(e) => {
                if let Err(cleanup) = svc.objects.remove_book_dir(&id) {
                    tracing::warn!(book = %id, error = %cleanup, "Failed to remove partial upload");
                }
                return Err(e);
            }
        };

        svc.durability.force_save()?;

        tracing::info!(
            book = %book.id,
            title = %book.title,
            bytes = request.bytes.len(),
            "Book ingested"
        );
        Ok(IngestOutcome::Ingested(book))
    }

    /// Book already holding content with this digest.
    pub fn check_duplicate(&self, digest: &Digest) -> Result<Option<Book>> {
        self.services()?.dedup.lookup(digest)
    }

    /// Apply a metadata edit. Only supplied fields change.
    pub fn update_metadata(&self, id: &str, mut update: BookUpdate) -> Result<Book> {
        let svc = self.services()?;
        let _writer = self.writer.lock();

        if let Some(raw) = update.isbn.take() {
            update.isbn = Some(normalize_isbn(Some(raw.as_str())).unwrap_or_default());
        }

        let book = svc
            .store
            .update_book(id, &update)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        svc.durability.request_save();
        tracing::info!(book = %id, "Book metadata updated");
        Ok(book)
    }

    /// Store a new cover image for a book.
    pub fn set_cover(&self, id: &str, extension: &str, bytes: &[u8]) -> Result<Book> {
        let svc = self.services()?;
        let _writer = self.writer.lock();

        if svc.store.get_book(id)?.is_none() {
            return Err(AppError::NotFound(id.to_string()));
        }

        let cover = svc.objects.write_cover(id, extension, bytes)?;
        svc.store.set_cover_image(id, Some(&cover))?;
        svc.durability.request_save();

        svc.store
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Recompute and store the digest of a book's file.
    pub fn rehash(&self, id: &str) -> Result<Digest> {
        let svc = self.services()?;
        let _writer = self.writer.lock();

        let book = svc
            .store
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        let path = svc.objects.resolve(&book.folder_path, &book.file_name)?;
        let digest = Digest::of_file(&path)?;

        svc.store.set_file_hash(id, Some(&digest))?;
        svc.durability.request_save();

        tracing::info!(book = %id, digest = %digest, "Book digest recomputed");
        Ok(digest)
    }

    /// Delete a book and its folder. Returns `false` if the book did not exist.
    ///
    /// The folder is removed only after the deletion has been written to disk.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let svc = self.services()?;
        let _writer = self.writer.lock();

        let book = match svc.store.get_book(id)? {
            Some(book) => book,
            None => return Ok(false),
        };

        svc.store.delete_book(id)?;
        svc.durability.force_save()?;

        let folder = if book.folder_path.is_empty() {
            id
        } else {
            book.folder_path.as_str()
        };
        if let Err(e) = svc.objects.remove_book_dir(folder) {
            tracing::warn!(book = %id, error = %e, "Failed to remove book folder");
        }

        tracing::info!(book = %id, title = %book.title, "Book deleted");
        Ok(true)
    }

    /// Get a book by ID.
    pub fn get(&self, id: &str) -> Result<Option<Book>> {
        self.services()?.store.get_book(id)
    }

    /// List books.
    pub fn list(&self, query: &BookQuery) -> Result<Vec<Book>> {
        self.services()?.store.list_books(query)
    }

    /// Count books matching an optional search term.
    pub fn count(&self, search: Option<&str>) -> Result<i64> {
        self.services()?.store.count_books(search)
    }

    /// Every author, by name.
    pub fn authors(&self) -> Result<Vec<Author>> {
        self.services()?.store.list_authors()
    }

    /// Authors linked to a book.
    pub fn book_authors(&self, id: &str) -> Result<Vec<Author>> {
        self.services()?.store.authors_of(id)
    }

    /// Absolute path of a book's file.
    pub fn file_path(&self, book: &Book) -> Result<PathBuf> {
        self.services()?
            .objects
            .resolve(&book.folder_path, &book.file_name)
    }

    /// Flush the catalog and return to [`CatalogState::Closed`].
    ///
    /// The catalog is closed even if the final write fails.
    pub fn shutdown(&self) -> Result<()> {
        let services = {
            let mut phase = self.phase.lock();
            while matches!(*phase, Phase::Opening) {
                self.phase_changed.wait(&mut phase);
            }
            let previous = std::mem::replace(&mut *phase, Phase::Closed);
            self.phase_changed.notify_all();
            match previous {
                Phase::Ready(services) => services,
                _ => return Ok(()),
            }
        };

        let _writer = self.writer.lock();
        services.durability.shutdown()
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        if let Phase::Ready(services) = &*self.phase.get_mut()
            && let Err(e) = services.durability.shutdown()
        {
            tracing::error!(error = %e, "Catalog dropped without a successful flush");
        }
    }
}

/// Write the files and insert the row of a new book.
fn store_new_book(
    svc: &Services,
    id: &str,
    request: &IngestRequest,
    digest: &Digest,
) -> Result<Book> {
    let file_name = svc
        .objects
        .write_book_file(id, &request.file_name, &request.bytes)?;

    let cover_image = match &request.cover {
        Some(cover) => Some(svc.objects.write_cover(id, &cover.extension, &cover.bytes)?),
        None => None,
    };

    let meta = &request.metadata;
    let title = clean_text(Some(meta.title.as_str())).unwrap_or_else(|| file_stem(&file_name));

    let book = Book {
        id: id.to_string(),
        title,
        author: clean_text(meta.author.as_deref()),
        description: clean_text(meta.description.as_deref()),
        category: clean_text(meta.category.as_deref()),
        isbn: normalize_isbn(meta.isbn.as_deref()),
        folder_path: id.to_string(),
        file_name,
        cover_image,
        file_size: Some(request.bytes.len() as i64),
        page_count: meta.page_count,
        publisher: clean_text(meta.publisher.as_deref()),
        year: meta.year,
        language: clean_text(meta.language.as_deref()),
        created_at: Some(now_timestamp()),
        updated_at: None,
        file_hash: Some(digest.as_str().to_string()),
    };

    svc.store.insert_book(&book)?;
    Ok(book)
}

/// ISBN-13 form when the input parses, otherwise the trimmed input.
fn normalize_isbn(raw: Option<&str>) -> Option<String> {
    clean_text(raw).map(|s| isbn::normalize(&s).unwrap_or(s))
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}
