use crate::catalog::{Catalog, CatalogState, CoverImage, IngestOutcome, IngestRequest};
use crate::config::Config;
use crate::db::{
    Book, BookQuery, ContentDedupIndex, Digest, SchemaMigrator, Store, insert_legacy_book,
    now_timestamp,
};
use crate::durability::{DurabilityCoordinator, write_snapshot};
use crate::error::AppError;
use crate::library::book::{BookMetadata, BookUpdate, split_author_names};
use crate::library::isbn;
use crate::library::objects::{ObjectStore, check_book_extension, sanitize_file_name};
use crate::storage::{
    LocatorContext, StorageLayout, StorageLocator, StorageMode, bundle_parent,
    is_standard_install,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

const WINDOW: Duration = Duration::from_millis(100);
const PAST_WINDOW: Duration = Duration::from_millis(400);

/// Schema of catalogs created before the additive columns existed.
const LEGACY_SCHEMA: &str = r#"
    CREATE TABLE books (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT,
        description TEXT,
        category TEXT,
        isbn TEXT,
        folderPath TEXT NOT NULL,
        fileName TEXT NOT NULL,
        coverImage TEXT,
        createdAt DATETIME DEFAULT CURRENT_TIMESTAMP
    );
"#;

fn test_store() -> Store {
    let store = Store::open_memory().unwrap();
    SchemaMigrator::new(&store).run().unwrap();
    store
}

fn legacy_store() -> Store {
    let store = Store::open_memory().unwrap();
    store.with_conn(|c| c.execute_batch(LEGACY_SCHEMA)).unwrap();
    store
}

fn make_book(id: &str, title: &str, author: Option<&str>) -> Book {
    Book {
        id: id.to_string(),
        title: title.to_string(),
        author: author.map(str::to_string),
        description: None,
        category: None,
        isbn: None,
        folder_path: id.to_string(),
        file_name: format!("{}.pdf", id),
        cover_image: None,
        file_size: Some(1000),
        page_count: None,
        publisher: None,
        year: None,
        language: None,
        created_at: Some(now_timestamp()),
        updated_at: None,
        file_hash: None,
    }
}

fn override_ctx(dir: &Path) -> LocatorContext {
    LocatorContext {
        data_dir_override: Some(dir.join("data")),
        exe_dir: dir.join("bin"),
        ..Default::default()
    }
}

fn test_layout(dir: &Path) -> StorageLayout {
    StorageLocator::default().resolve(&override_ctx(dir)).unwrap()
}

fn open_catalog(dir: &Path) -> Catalog {
    let catalog = Catalog::new(test_layout(dir), WINDOW);
    catalog.open().unwrap();
    catalog
}

fn ingest(catalog: &Catalog, file_name: &str, bytes: &[u8], title: &str) -> Book {
    let mut request = IngestRequest::new(file_name, bytes.to_vec());
    request.metadata.title = title.to_string();
    match catalog.ingest(request).unwrap() {
        IngestOutcome::Ingested(book) => book,
        IngestOutcome::Duplicate(book) => panic!("unexpected duplicate of {}", book.id),
    }
}

fn author_names(catalog: &Catalog, id: &str) -> Vec<String> {
    catalog
        .book_authors(id)
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect()
}

fn count_dirs(root: &Path) -> usize {
    std::fs::read_dir(root)
        .map(|entries| entries.filter(|e| e.as_ref().unwrap().path().is_dir()).count())
        .unwrap_or(0)
}

// ========== STORE ==========

#[test]
fn store_insert_and_get_book() {
    let store = test_store();
    let mut book = make_book("book-1", "Test Book", Some("Ada Lovelace"));
    book.isbn = Some("9780306406157".to_string());
    book.year = Some(1843);
    store.insert_book(&book).unwrap();

    let found = store.get_book("book-1").unwrap().unwrap();
    assert_eq!(found, book);
    assert!(store.get_book("missing").unwrap().is_none());
}

#[test]
fn store_query_returns_named_columns() {
    let store = test_store();
    store.insert_book(&make_book("book-1", "Alpha", None)).unwrap();

    let rows = store
        .query("SELECT id, title, fileSize FROM books WHERE id = ?1", ["book-1"])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), ["id", "title", "fileSize"]);
    assert_eq!(rows[0].get_str("title"), Some("Alpha"));
    assert_eq!(rows[0].get_i64("fileSize"), Some(1000));
    assert!(rows[0].get("missing").is_none());
}

#[test]
fn store_bad_statement_is_database_error() {
    let store = test_store();
    let err = store.query("SELECT nope FROM books", []).unwrap_err();
    assert!(matches!(err, AppError::Database(_)));
}

#[test]
fn store_duplicate_id_is_constraint_error() {
    let store = test_store();
    store.insert_book(&make_book("book-1", "Alpha", None)).unwrap();
    let err = store.insert_book(&make_book("book-1", "Beta", None)).unwrap_err();
    assert!(matches!(err, AppError::Constraint(_)));
    assert_eq!(store.count_rows("books").unwrap(), 1);
}

#[test]
fn store_count_rows_rejects_unknown_table() {
    let store = test_store();
    assert!(store.count_rows("sqlite_master").is_err());
}

#[test]
fn store_snapshot_round_trip_preserves_rows() {
    let store = test_store();
    store
        .insert_book(&make_book("book-1", "Alpha", Some("Ada Lovelace; Charles Babbage")))
        .unwrap();

    let bytes = store.export_snapshot().unwrap();
    assert!(bytes.starts_with(b"SQLite format 3\0"));

    let restored = Store::from_snapshot(&bytes).unwrap();
    assert_eq!(
        restored.get_book("book-1").unwrap(),
        store.get_book("book-1").unwrap()
    );
    assert_eq!(restored.count_rows("authors").unwrap(), 2);
    assert_eq!(restored.count_rows("book_authors").unwrap(), 2);
}

#[test]
fn store_rejects_garbage_snapshot() {
    let err = Store::from_snapshot(b"definitely not a database").unwrap_err();
    assert!(matches!(err, AppError::CorruptSnapshot(_)));
    assert!(err.is_startup_fatal());

    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend(std::iter::repeat_n(0xFF, 200));
    let err = Store::from_snapshot(&bytes).unwrap_err();
    assert!(matches!(err, AppError::CorruptSnapshot(_)));
}

#[test]
fn store_empty_snapshot_is_empty_catalog() {
    let store = Store::from_snapshot(&[]).unwrap();
    SchemaMigrator::new(&store).run().unwrap();
    assert_eq!(store.count_rows("books").unwrap(), 0);
}

#[test]
fn store_open_missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("none.db")).unwrap();
    SchemaMigrator::new(&store).run().unwrap();
    assert_eq!(store.count_rows("books").unwrap(), 0);
}

#[test]
fn store_list_orders_by_last_edit_and_filters() {
    let store = test_store();
    let mut alpha = make_book("a", "Alpha", Some("Ada Lovelace"));
    alpha.created_at = Some("2024-01-01T00:00:00.000Z".to_string());
    let mut beta = make_book("b", "Beta", Some("Charles Babbage"));
    beta.created_at = Some("2024-02-01T00:00:00.000Z".to_string());
    store.insert_book(&alpha).unwrap();
    store.insert_book(&beta).unwrap();

    let ids: Vec<String> = store
        .list_books(&BookQuery::default())
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, ["b", "a"]);

    store
        .update_book("a", &BookUpdate {
            description: Some("edited".to_string()),
            ..Default::default()
        })
        .unwrap();
    let first = &store.list_books(&BookQuery::default()).unwrap()[0];
    assert_eq!(first.id, "a");

    let query = BookQuery {
        search: Some("babbage".to_string()),
        ..Default::default()
    };
    let found = store.list_books(&query).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "b");
    assert_eq!(store.count_books(Some("babbage")).unwrap(), 1);
    assert_eq!(store.count_books(None).unwrap(), 2);

    let page_two = BookQuery {
        page: 2,
        limit: 1,
        ..Default::default()
    };
    assert_eq!(store.list_books(&page_two).unwrap().len(), 1);
}

#[test]
fn store_delete_cascades_links_but_keeps_authors() {
    let store = test_store();
    store
        .insert_book(&make_book("book-1", "Alpha", Some("Ada Lovelace; Charles Babbage")))
        .unwrap();
    assert_eq!(store.count_rows("book_authors").unwrap(), 2);

    assert!(store.delete_book("book-1").unwrap());
    assert_eq!(store.count_rows("books").unwrap(), 0);
    assert_eq!(store.count_rows("book_authors").unwrap(), 0);
    assert_eq!(store.count_rows("authors").unwrap(), 2);

    assert!(!store.delete_book("book-1").unwrap());
}

#[test]
fn store_shared_author_is_stored_once() {
    let store = test_store();
    store
        .insert_book(&make_book("a", "Alpha", Some("Ada Lovelace")))
        .unwrap();
    store
        .insert_book(&make_book("b", "Beta", Some("Ada Lovelace; Charles Babbage")))
        .unwrap();

    assert_eq!(store.count_rows("authors").unwrap(), 2);
    assert_eq!(store.count_rows("book_authors").unwrap(), 3);

    let links = store.book_author_links("b").unwrap();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|l| l.role == "author"));
}

#[test]
fn store_update_relinks_authors_in_place() {
    let store = test_store();
    store
        .insert_book(&make_book("book-1", "Alpha", Some("Ada Lovelace; Charles Babbage")))
        .unwrap();

    let updated = store
        .update_book("book-1", &BookUpdate {
            author: Some("Grace Hopper".to_string()),
            category: Some("   ".to_string()),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert_eq!(updated.author.as_deref(), Some("Grace Hopper"));
    assert!(updated.category.is_none());
    assert!(updated.updated_at.is_some());

    let names: Vec<String> = store
        .authors_of("book-1")
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, ["Grace Hopper"]);
    assert_eq!(store.count_rows("authors").unwrap(), 3);

    assert!(
        store
            .update_book("missing", &BookUpdate {
                title: Some("X".to_string()),
                ..Default::default()
            })
            .unwrap()
            .is_none()
    );
}

// ========== MIGRATION ==========

#[test]
fn migrate_fresh_catalog_creates_tables() {
    let store = Store::open_memory().unwrap();
    let report = SchemaMigrator::new(&store).run().unwrap();
    assert_eq!(report.tables_created, ["books", "authors", "book_authors"]);
    assert!(report.columns_added.is_empty());
    assert!(report.legacy_authors.is_none());
    assert!(report.changed());
}

#[test]
fn migrate_legacy_catalog_adds_columns_and_splits_authors() {
    let store = legacy_store();
    insert_legacy_book(&store, "b1", "Notes", Some("Ada Lovelace; Charles Babbage"));
    insert_legacy_book(&store, "b2", "Blank", Some("   "));
    insert_legacy_book(&store, "b3", "Empty", Some(""));
    insert_legacy_book(&store, "b4", "None", None);

    let report = SchemaMigrator::new(&store).run().unwrap();
    assert_eq!(report.tables_created, ["authors", "book_authors"]);
    assert_eq!(
        report.columns_added,
        ["fileSize", "pageCount", "publisher", "year", "language", "updatedAt", "fileHash"]
    );

    let stats = report.legacy_authors.unwrap();
    assert_eq!(stats.books, 1);
    assert_eq!(stats.authors, 2);
    assert_eq!(stats.links, 2);
    assert_eq!(stats.skipped, 0);

    let names: Vec<String> = store
        .authors_of("b1")
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, ["Ada Lovelace", "Charles Babbage"]);
    assert!(store.authors_of("b2").unwrap().is_empty());

    // Legacy rows read back with the new columns empty
    let legacy = store.get_book("b1").unwrap().unwrap();
    assert!(legacy.file_hash.is_none());
    assert!(legacy.file_size.is_none());
}

#[test]
fn migrate_twice_changes_nothing() {
    let store = legacy_store();
    insert_legacy_book(&store, "b1", "Notes", Some("Ada Lovelace; Charles Babbage"));

    SchemaMigrator::new(&store).run().unwrap();
    let counts = |s: &Store| {
        (
            s.count_rows("books").unwrap(),
            s.count_rows("authors").unwrap(),
            s.count_rows("book_authors").unwrap(),
        )
    };
    let before = counts(&store);

    let second = SchemaMigrator::new(&store).run().unwrap();
    assert!(!second.changed());
    assert!(second.legacy_authors.is_none());
    assert_eq!(counts(&store), before);
    assert_eq!(before, (1, 2, 2));
}

#[test]
fn migrate_blank_only_authors_create_nothing() {
    let store = legacy_store();
    insert_legacy_book(&store, "b1", "Blank", Some("   "));
    insert_legacy_book(&store, "b2", "Empty", Some(""));
    insert_legacy_book(&store, "b3", "Separators", Some(" ; ;"));

    let report = SchemaMigrator::new(&store).run().unwrap();
    let stats = report.legacy_authors.unwrap();
    assert_eq!((stats.authors, stats.links), (0, 0));
    assert_eq!(store.count_rows("authors").unwrap(), 0);
    assert_eq!(store.count_rows("book_authors").unwrap(), 0);
}

#[test]
fn migrate_skips_non_text_author() {
    let store = legacy_store();
    store
        .execute(
            "INSERT INTO books (id, title, author, folderPath, fileName) VALUES ('b1', 'Odd', X'DEADBEEF', 'b1', 'b1.pdf')",
            [],
        )
        .unwrap();
    insert_legacy_book(&store, "b2", "Fine", Some("Ada Lovelace"));

    let stats = SchemaMigrator::new(&store).run().unwrap().legacy_authors.unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.links, 1);
    assert!(store.authors_of("b1").unwrap().is_empty());
}

#[test]
fn migrate_normalizes_blank_digests() {
    let store = test_store();
    store.insert_book(&make_book("b1", "Alpha", None)).unwrap();
    store
        .execute("UPDATE books SET fileHash = '  ' WHERE id = 'b1'", [])
        .unwrap();

    let report = SchemaMigrator::new(&store).run().unwrap();
    assert_eq!(report.digests_normalized, 1);

    let rows = store
        .query("SELECT COUNT(*) AS n FROM books WHERE fileHash IS NULL", [])
        .unwrap();
    assert_eq!(rows[0].get_i64("n"), Some(1));
}

#[test]
fn migrate_skipped_when_links_exist() {
    let store = test_store();
    store
        .insert_book(&make_book("b1", "Alpha", Some("Ada Lovelace")))
        .unwrap();
    // A row added without links must not trigger the legacy split
    store
        .execute(
            "INSERT INTO books (id, title, author, folderPath, fileName) VALUES ('b2', 'Beta', 'Grace Hopper', 'b2', 'b2.pdf')",
            [],
        )
        .unwrap();

    let report = SchemaMigrator::new(&store).run().unwrap();
    assert!(report.legacy_authors.is_none());
    assert_eq!(store.count_rows("authors").unwrap(), 1);
}

// ========== DEDUP ==========

#[test]
fn digest_of_known_content() {
    assert_eq!(
        Digest::of_bytes(b"").as_str(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(
        Digest::of_reader(&b"dummy"[..]).unwrap(),
        Digest::of_bytes(b"dummy")
    );
    assert_ne!(Digest::of_bytes(b"dummy"), Digest::of_bytes(b"dummy2"));
}

#[test]
fn digest_parse_rules() {
    assert_eq!(Digest::parse("").unwrap(), None);
    assert_eq!(Digest::parse("   ").unwrap(), None);
    assert!(Digest::parse("xyz").is_err());

    let upper = Digest::of_bytes(b"dummy").as_str().to_ascii_uppercase();
    assert_eq!(
        Digest::parse(&upper).unwrap(),
        Some(Digest::of_bytes(b"dummy"))
    );
}

#[test]
fn dedup_lookup_hit_miss_and_blank() {
    let store = test_store();
    let index = ContentDedupIndex::new(store.clone());

    let dummy = Digest::of_bytes(b"dummy");
    let mut book = make_book("b1", "Alpha", None);
    book.file_hash = Some(dummy.as_str().to_string());
    store.insert_book(&book).unwrap();
    store.insert_book(&make_book("b2", "Unhashed", None)).unwrap();

    assert_eq!(index.lookup(&dummy).unwrap().unwrap().id, "b1");
    assert!(index.lookup(&Digest::of_bytes(b"dummy2")).unwrap().is_none());

    assert!(index.lookup_str(None).unwrap().is_none());
    assert!(index.lookup_str(Some("")).unwrap().is_none());
    assert!(index.lookup_str(Some("  ")).unwrap().is_none());
    assert_eq!(
        index.lookup_str(Some(dummy.as_str())).unwrap().unwrap().id,
        "b1"
    );
}

#[test]
fn dedup_returns_earliest_of_several() {
    let store = test_store();
    let index = ContentDedupIndex::new(store.clone());
    let digest = Digest::of_bytes(b"same");

    for (id, created) in [("late", "2024-05-01T00:00:00.000Z"), ("early", "2024-01-01T00:00:00.000Z")] {
        let mut book = make_book(id, id, None);
        book.created_at = Some(created.to_string());
        book.file_hash = Some(digest.as_str().to_string());
        store.insert_book(&book).unwrap();
    }

    assert_eq!(index.lookup(&digest).unwrap().unwrap().id, "early");
}

// ========== DURABILITY ==========

#[tokio::test]
async fn durability_force_save_then_reopen_reproduces_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("babi.db");
    let store = test_store();
    let durability = DurabilityCoordinator::new(store.clone(), &path, WINDOW).unwrap();

    store
        .insert_book(&make_book("b1", "Alpha", Some("Ada Lovelace; Charles Babbage")))
        .unwrap();
    durability.force_save().unwrap();
    assert_eq!(durability.flush_count(), 1);
    assert!(!durability.is_dirty());

    let reopened = Store::open(&path).unwrap();
    assert_eq!(
        reopened.get_book("b1").unwrap(),
        store.get_book("b1").unwrap()
    );
    assert_eq!(reopened.count_rows("book_authors").unwrap(), 2);
}

#[tokio::test]
async fn durability_coalesces_burst_into_one_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("babi.db");
    let store = test_store();
    let durability = DurabilityCoordinator::new(store.clone(), &path, WINDOW).unwrap();

    for i in 0..10 {
        store
            .insert_book(&make_book(&format!("b{}", i), "Burst", None))
            .unwrap();
        durability.request_save();
    }
    assert_eq!(durability.flush_count(), 0);
    assert!(durability.has_pending());
    assert!(!path.exists());

    tokio::time::sleep(PAST_WINDOW).await;

    assert_eq!(durability.flush_count(), 1);
    assert!(!durability.is_dirty());
    assert!(!durability.has_pending());
    assert_eq!(Store::open(&path).unwrap().count_rows("books").unwrap(), 10);
}

#[tokio::test]
async fn durability_single_request_writes_once() {
    let dir = tempfile::tempdir().unwrap();
    let durability =
        DurabilityCoordinator::new(test_store(), dir.path().join("babi.db"), WINDOW).unwrap();

    durability.request_save();
    tokio::time::sleep(PAST_WINDOW).await;
    assert_eq!(durability.flush_count(), 1);

    tokio::time::sleep(PAST_WINDOW).await;
    assert_eq!(durability.flush_count(), 1);
}

#[tokio::test]
async fn durability_force_save_cancels_pending_alarm() {
    let dir = tempfile::tempdir().unwrap();
    let durability =
        DurabilityCoordinator::new(test_store(), dir.path().join("babi.db"), WINDOW).unwrap();

    durability.request_save();
    durability.force_save().unwrap();
    assert_eq!(durability.flush_count(), 1);
    assert!(!durability.has_pending());

    tokio::time::sleep(PAST_WINDOW).await;
    assert_eq!(durability.flush_count(), 1);
}

#[tokio::test]
async fn durability_shutdown_flushes_and_stops_alarms() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("babi.db");
    let store = test_store();
    let durability = DurabilityCoordinator::new(store.clone(), &path, WINDOW).unwrap();

    store.insert_book(&make_book("b1", "Alpha", None)).unwrap();
    durability.request_save();
    durability.shutdown().unwrap();
    assert!(durability.is_closed());
    assert_eq!(durability.flush_count(), 1);
    assert_eq!(Store::open(&path).unwrap().count_rows("books").unwrap(), 1);

    durability.request_save();
    tokio::time::sleep(PAST_WINDOW).await;
    assert_eq!(durability.flush_count(), 1);

    assert!(matches!(
        durability.force_save().unwrap_err(),
        AppError::NotReady(_)
    ));
    durability.shutdown().unwrap();
    assert_eq!(durability.flush_count(), 1);
}

#[tokio::test]
async fn durability_failed_write_keeps_dirty_and_old_file() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the catalog file should be makes every write fail
    let path = dir.path().join("babi.db");
    std::fs::create_dir(&path).unwrap();

    let durability = DurabilityCoordinator::new(test_store(), &path, WINDOW).unwrap();
    assert!(durability.force_save().is_err());
    assert_eq!(durability.failed_flushes(), 1);
    assert_eq!(durability.flush_count(), 0);
    assert!(durability.is_dirty());
    assert!(path.is_dir());
}

#[test]
fn durability_requires_runtime() {
    let err = DurabilityCoordinator::new(test_store(), "babi.db", WINDOW).unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
}

#[test]
fn write_snapshot_replaces_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("babi.db");

    write_snapshot(&path, b"first").unwrap();
    write_snapshot(&path, b"second").unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"second");

    let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 1);
}

// ========== STORAGE ==========

#[test]
fn storage_override_wins() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    std::fs::create_dir_all(root.join("data")).unwrap();
    std::fs::write(root.join("data").join("babi.db"), b"").unwrap();

    let ctx = LocatorContext {
        data_dir_override: Some(dir.path().join("custom")),
        exe_dir: root.join("app"),
        standard_install: true,
        user_data_dir: Some(dir.path().join("user")),
        ..Default::default()
    };
    let layout = StorageLocator::default().resolve(&ctx).unwrap();

    assert_eq!(layout.mode, StorageMode::Override);
    assert_eq!(layout.catalog_path, dir.path().join("custom").join("babi.db"));
    assert_eq!(layout.object_root, dir.path().join("custom").join("uploads"));
    assert!(layout.data_dir.is_dir());
    assert!(layout.object_root.is_dir());
}

#[test]
fn storage_shared_root_beats_local_data() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("usb");
    let exe_dir = root.join("apps").join("babi");
    std::fs::create_dir_all(root.join("data")).unwrap();
    std::fs::write(root.join("data").join("babi.db"), b"").unwrap();
    std::fs::create_dir_all(exe_dir.join("data")).unwrap();

    let ctx = LocatorContext {
        exe_dir: exe_dir.clone(),
        ..Default::default()
    };
    let layout = StorageLocator::default().select(&ctx).unwrap();

    assert_eq!(layout.mode, StorageMode::SharedRoot);
    assert_eq!(layout.catalog_path, root.join("data").join("babi.db"));
    assert_eq!(layout.object_root, root.join("uploads"));
}

#[test]
fn storage_shared_root_beyond_depth_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("usb");
    let exe_dir = root.join("a").join("b").join("c").join("d");
    std::fs::create_dir_all(root.join("data")).unwrap();
    std::fs::write(root.join("data").join("babi.db"), b"").unwrap();
    std::fs::create_dir_all(&exe_dir).unwrap();

    let ctx = LocatorContext {
        exe_dir: exe_dir.clone(),
        ..Default::default()
    };
    let layout = StorageLocator::default().select(&ctx).unwrap();
    assert_eq!(layout.mode, StorageMode::Portable);
    assert_eq!(layout.data_dir, exe_dir.join("data"));

    let deeper = StorageLocator::new("babi.db", 4).select(&ctx).unwrap();
    assert_eq!(deeper.mode, StorageMode::SharedRoot);
}

#[test]
fn storage_non_standard_install_is_portable() {
    let dir = tempfile::tempdir().unwrap();
    let exe_dir = dir.path().join("portable");

    let ctx = LocatorContext {
        exe_dir: exe_dir.clone(),
        standard_install: false,
        user_data_dir: Some(dir.path().join("user")),
        ..Default::default()
    };
    let layout = StorageLocator::default().resolve(&ctx).unwrap();

    assert_eq!(layout.mode, StorageMode::Portable);
    assert_eq!(layout.catalog_path, exe_dir.join("data").join("babi.db"));
    assert_eq!(layout.object_root, exe_dir.join("uploads"));
    assert!(exe_dir.join("data").is_dir());
}

#[test]
fn storage_standard_install_uses_user_dir() {
    let dir = tempfile::tempdir().unwrap();
    let user = dir.path().join("user");

    let ctx = LocatorContext {
        exe_dir: dir.path().join("install"),
        standard_install: true,
        user_data_dir: Some(user.clone()),
        ..Default::default()
    };
    let layout = StorageLocator::default().select(&ctx).unwrap();
    assert_eq!(layout.mode, StorageMode::Standard);
    assert_eq!(layout.catalog_path, user.join("babi.db"));

    // An existing local data directory still wins
    std::fs::create_dir_all(dir.path().join("install").join("data")).unwrap();
    let layout = StorageLocator::default().select(&ctx).unwrap();
    assert_eq!(layout.mode, StorageMode::Portable);
}

#[test]
fn storage_standard_install_without_user_dir_fails() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = LocatorContext {
        exe_dir: dir.path().join("install"),
        standard_install: true,
        user_data_dir: None,
        ..Default::default()
    };
    let err = StorageLocator::default().select(&ctx).unwrap_err();
    assert!(matches!(err, AppError::Storage(_)));
    assert!(err.is_startup_fatal());
}

#[test]
fn storage_objects_override_applies_to_every_mode() {
    let dir = tempfile::tempdir().unwrap();
    let objects = dir.path().join("objects");
    let ctx = LocatorContext {
        objects_dir_override: Some(objects.clone()),
        exe_dir: dir.path().join("portable"),
        ..Default::default()
    };
    let layout = StorageLocator::default().select(&ctx).unwrap();
    assert_eq!(layout.mode, StorageMode::Portable);
    assert_eq!(layout.object_root, objects);
}

#[test]
fn storage_macos_bundle_parent() {
    let exe = PathBuf::from("/Volumes/USB/Babi.app/Contents/MacOS");
    assert_eq!(bundle_parent(&exe), PathBuf::from("/Volumes/USB"));

    let plain = PathBuf::from("/media/usb/babi");
    assert_eq!(bundle_parent(&plain), plain);
}

#[test]
fn storage_standard_install_detection() {
    assert!(is_standard_install(Path::new("/usr/local/bin")));
    assert!(is_standard_install(Path::new("/opt/babi")));
    assert!(is_standard_install(Path::new("/Applications/Babi.app/Contents/MacOS")));
    assert!(is_standard_install(Path::new(r"C:\Program Files\Babi")));
    assert!(!is_standard_install(Path::new("/media/usb/babi")));
    assert!(!is_standard_install(Path::new("/home/user/Downloads/babi")));
}

// ========== CATALOG ==========

#[tokio::test]
async fn catalog_not_ready_before_open() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::new(test_layout(dir.path()), WINDOW);

    assert_eq!(catalog.state(), CatalogState::Closed);
    assert!(matches!(catalog.get("x").unwrap_err(), AppError::NotReady(_)));
    assert!(matches!(
        catalog.ingest(IngestRequest::new("a.pdf", b"dummy".to_vec())).unwrap_err(),
        AppError::NotReady(_)
    ));
    catalog.shutdown().unwrap();
}

#[tokio::test]
async fn catalog_open_writes_new_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    assert_eq!(catalog.state(), CatalogState::Ready);
    assert!(catalog.layout().catalog_path.is_file());
    assert_eq!(catalog.count(None).unwrap(), 0);

    // Second open is a no-op
    assert!(!catalog.open().unwrap().changed());
}

#[tokio::test]
async fn catalog_corrupt_snapshot_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let layout = test_layout(dir.path());
    std::fs::write(&layout.catalog_path, b"this is not a database").unwrap();

    let catalog = Catalog::new(layout.clone(), WINDOW);
    let err = catalog.open().unwrap_err();
    assert!(matches!(err, AppError::CorruptSnapshot(_)));
    assert!(err.is_startup_fatal());
    assert_eq!(catalog.state(), CatalogState::Failed);
    assert!(matches!(catalog.count(None).unwrap_err(), AppError::NotReady(_)));

    // The bad file is left for the user to recover
    assert_eq!(
        std::fs::read(&layout.catalog_path).unwrap(),
        b"this is not a database"
    );
}

#[tokio::test]
async fn catalog_ingest_detects_duplicates_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());
    let objects = catalog.layout().object_root.clone();

    let first = ingest(&catalog, "first.pdf", b"dummy", "First");
    assert_eq!(first.file_hash.as_deref(), Some(Digest::of_bytes(b"dummy").as_str()));
    assert_eq!(first.file_size, Some(5));
    let stored = catalog.file_path(&first).unwrap();
    assert_eq!(std::fs::read(&stored).unwrap(), b"dummy");

    let again = catalog
        .ingest(IngestRequest::new("copy.pdf", b"dummy".to_vec()))
        .unwrap();
    match again {
        IngestOutcome::Duplicate(existing) => assert_eq!(existing.id, first.id),
        IngestOutcome::Ingested(_) => panic!("duplicate content was ingested"),
    }
    assert_eq!(catalog.count(None).unwrap(), 1);
    assert_eq!(count_dirs(&objects), 1);

    ingest(&catalog, "second.pdf", b"dummy2", "Second");
    assert_eq!(catalog.count(None).unwrap(), 2);
    assert_eq!(count_dirs(&objects), 2);

    let hit = catalog
        .check_duplicate(&Digest::of_bytes(b"dummy2"))
        .unwrap()
        .unwrap();
    assert_eq!(hit.title, "Second");
    assert!(
        catalog
            .check_duplicate(&Digest::of_bytes(b"dummy3"))
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn catalog_ingest_allows_forced_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    ingest(&catalog, "a.pdf", b"dummy", "A");
    let mut request = IngestRequest::new("b.pdf", b"dummy".to_vec());
    request.allow_duplicate = true;
    assert!(matches!(
        catalog.ingest(request).unwrap(),
        IngestOutcome::Ingested(_)
    ));
    assert_eq!(catalog.count(None).unwrap(), 2);
}

#[tokio::test]
async fn catalog_ingest_is_persisted_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());
    let flushes = catalog.durability().unwrap().flush_count();

    let book = ingest(&catalog, "a.epub", b"epub bytes", "Persisted");
    assert_eq!(catalog.durability().unwrap().flush_count(), flushes + 1);

    let on_disk = Store::open(&catalog.layout().catalog_path).unwrap();
    assert_eq!(on_disk.get_book(&book.id).unwrap().unwrap().title, "Persisted");
}

#[tokio::test]
async fn catalog_ingest_rejects_unsupported_files() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    let err = catalog
        .ingest(IngestRequest::new("notes.txt", b"text".to_vec()))
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidFormat(_)));

    let mut request = IngestRequest::new("a.pdf", b"pdf".to_vec());
    request.cover = Some(CoverImage {
        extension: "gif".to_string(),
        bytes: b"gif".to_vec(),
    });
    assert!(catalog.ingest(request).is_err());

    // Nothing left behind by either attempt
    assert_eq!(catalog.count(None).unwrap(), 0);
    assert_eq!(count_dirs(&catalog.layout().object_root), 0);
}

#[tokio::test]
async fn catalog_ingest_applies_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    let mut request = IngestRequest::new("../../analytical-engine.pdf", b"notes".to_vec());
    request.metadata = BookMetadata {
        title: "  ".to_string(),
        author: Some("Ada Lovelace; Charles Babbage".to_string()),
        isbn: Some("0-306-40615-2".to_string()),
        year: Some(1843),
        ..Default::default()
    };
    request.cover = Some(CoverImage {
        extension: "PNG".to_string(),
        bytes: b"png".to_vec(),
    });
    let book = match catalog.ingest(request).unwrap() {
        IngestOutcome::Ingested(book) => book,
        IngestOutcome::Duplicate(_) => panic!("unexpected duplicate"),
    };

    assert_eq!(book.title, "analytical-engine");
    assert_eq!(book.file_name, "analytical-engine.pdf");
    assert_eq!(book.folder_path, book.id);
    assert_eq!(book.isbn.as_deref(), Some("9780306406157"));
    assert_eq!(book.cover_image.as_deref(), Some("cover.png"));
    assert_eq!(book.year, Some(1843));
    assert_eq!(
        author_names(&catalog, &book.id),
        ["Ada Lovelace", "Charles Babbage"]
    );
    assert!(
        catalog
            .layout()
            .object_root
            .join(&book.id)
            .join("cover.png")
            .is_file()
    );
}

#[tokio::test]
async fn catalog_edit_relinks_authors_and_saves_later() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    let mut request = IngestRequest::new("a.pdf", b"dummy".to_vec());
    request.metadata.title = "Notes".to_string();
    request.metadata.author = Some("Ada Lovelace; Charles Babbage".to_string());
    let book = match catalog.ingest(request).unwrap() {
        IngestOutcome::Ingested(book) => book,
        IngestOutcome::Duplicate(_) => panic!("unexpected duplicate"),
    };

    let updated = catalog
        .update_metadata(&book.id, BookUpdate {
            title: Some("Sketch of the Analytical Engine".to_string()),
            author: Some("Ada Lovelace; Luigi Menabrea".to_string()),
            isbn: Some("0306406152".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(updated.title, "Sketch of the Analytical Engine");
    assert_eq!(updated.isbn.as_deref(), Some("9780306406157"));
    assert_eq!(
        author_names(&catalog, &book.id),
        ["Ada Lovelace", "Luigi Menabrea"]
    );
    assert_eq!(catalog.authors().unwrap().len(), 3);

    let durability = catalog.durability().unwrap();
    assert!(durability.is_dirty());
    tokio::time::sleep(PAST_WINDOW).await;
    assert!(!durability.is_dirty());

    let on_disk = Store::open(&catalog.layout().catalog_path).unwrap();
    assert_eq!(
        on_disk.get_book(&book.id).unwrap().unwrap().title,
        "Sketch of the Analytical Engine"
    );
}

#[tokio::test]
async fn catalog_edit_errors() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());
    let book = ingest(&catalog, "a.pdf", b"dummy", "Notes");

    let missing = catalog
        .update_metadata("missing", BookUpdate {
            title: Some("X".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));

    let blank = catalog
        .update_metadata(&book.id, BookUpdate {
            title: Some("   ".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(blank, AppError::InvalidFormat(_)));
    assert_eq!(catalog.get(&book.id).unwrap().unwrap().title, "Notes");
}

#[tokio::test]
async fn catalog_set_cover_and_rehash() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    let mut request = IngestRequest::new("a.pdf", b"real content".to_vec());
    request.digest = Some(Digest::of_bytes(b"stale"));
    let book = match catalog.ingest(request).unwrap() {
        IngestOutcome::Ingested(book) => book,
        IngestOutcome::Duplicate(_) => panic!("unexpected duplicate"),
    };
    assert_eq!(book.file_hash.as_deref(), Some(Digest::of_bytes(b"stale").as_str()));

    let digest = catalog.rehash(&book.id).unwrap();
    assert_eq!(digest, Digest::of_bytes(b"real content"));
    assert_eq!(
        catalog.get(&book.id).unwrap().unwrap().file_hash.as_deref(),
        Some(digest.as_str())
    );

    let covered = catalog.set_cover(&book.id, "jpg", b"jpeg").unwrap();
    assert_eq!(covered.cover_image.as_deref(), Some("cover.jpg"));
    assert!(covered.updated_at.is_some());

    assert!(matches!(
        catalog.set_cover("missing", "jpg", b"jpeg").unwrap_err(),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        catalog.rehash("missing").unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn catalog_delete_removes_row_links_and_folder() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    let mut request = IngestRequest::new("a.pdf", b"dummy".to_vec());
    request.metadata.author = Some("Ada Lovelace".to_string());
    let book = match catalog.ingest(request).unwrap() {
        IngestOutcome::Ingested(book) => book,
        IngestOutcome::Duplicate(_) => panic!("unexpected duplicate"),
    };
    let folder = catalog.layout().object_root.join(&book.id);
    assert!(folder.is_dir());

    assert!(catalog.delete(&book.id).unwrap());
    assert!(!folder.exists());
    assert!(catalog.get(&book.id).unwrap().is_none());
    assert!(catalog.book_authors(&book.id).unwrap().is_empty());
    assert_eq!(catalog.authors().unwrap().len(), 1);

    // Deletion is on disk before returning
    let on_disk = Store::open(&catalog.layout().catalog_path).unwrap();
    assert!(on_disk.get_book(&book.id).unwrap().is_none());

    assert!(!catalog.delete(&book.id).unwrap());
}

#[tokio::test]
async fn catalog_shutdown_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    let book = ingest(&catalog, "a.pdf", b"dummy", "Notes");
    catalog
        .update_metadata(&book.id, BookUpdate {
            publisher: Some("Taylor".to_string()),
            ..Default::default()
        })
        .unwrap();

    catalog.shutdown().unwrap();
    assert_eq!(catalog.state(), CatalogState::Closed);
    assert!(matches!(catalog.get(&book.id).unwrap_err(), AppError::NotReady(_)));
    catalog.shutdown().unwrap();

    let report = catalog.open().unwrap();
    assert!(!report.changed());
    assert_eq!(catalog.state(), CatalogState::Ready);
    let reloaded = catalog.get(&book.id).unwrap().unwrap();
    assert_eq!(reloaded.publisher.as_deref(), Some("Taylor"));
    assert_eq!(catalog.list(&BookQuery::default()).unwrap().len(), 1);
}

// ========== LIBRARY ==========

#[test]
fn split_author_names_rules() {
    assert_eq!(
        split_author_names("Ada Lovelace; Charles Babbage"),
        ["Ada Lovelace", "Charles Babbage"]
    );
    assert_eq!(split_author_names(" Ada ;Ada; Grace "), ["Ada", "Grace"]);
    assert!(split_author_names("").is_empty());
    assert!(split_author_names("   ").is_empty());
    assert!(split_author_names(" ; ; ").is_empty());
}

#[test]
fn isbn_normalization() {
    assert_eq!(isbn::normalize("0306406152").as_deref(), Some("9780306406157"));
    assert_eq!(isbn::normalize("0-306-40615-2").as_deref(), Some("9780306406157"));
    assert_eq!(isbn::normalize("080442957X").as_deref(), Some("9780804429573"));
    assert_eq!(isbn::normalize("978-0-306-40615-7").as_deref(), Some("9780306406157"));
    assert_eq!(isbn::normalize("12345"), None);
    assert_eq!(isbn::normalize("03064061X2"), None);
    assert_eq!(isbn::format("9780306406157"), "978-0-3064-0615-7");
    assert_eq!(isbn::format("n/a"), "n/a");
}

#[test]
fn isbn_multibyte_input_never_parses() {
    assert_eq!(isbn::normalize("12345678é"), None);
    assert_eq!(isbn::normalize("123456789é"), None);
    assert_eq!(isbn::normalize("978030640615é"), None);
    assert_eq!(isbn::normalize("０３０６４０６１５２"), None);
    assert_eq!(isbn::format("12345678é"), "12345678é");
}

#[tokio::test]
async fn catalog_keeps_unparseable_multibyte_isbn() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path());

    let mut request = IngestRequest::new("a.pdf", b"dummy".to_vec());
    request.metadata.isbn = Some("12345678é".to_string());
    let book = match catalog.ingest(request).unwrap() {
        IngestOutcome::Ingested(book) => book,
        IngestOutcome::Duplicate(_) => panic!("unexpected duplicate"),
    };
    assert_eq!(book.isbn.as_deref(), Some("12345678é"));

    let updated = catalog
        .update_metadata(&book.id, BookUpdate {
            isbn: Some("0-306-4061é".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(updated.isbn.as_deref(), Some("0-306-4061é"));
}

#[test]
fn object_store_rejects_escaping_paths() {
    let dir = tempfile::tempdir().unwrap();
    let objects = ObjectStore::new(dir.path());

    assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
    assert!(sanitize_file_name("").is_err());
    assert!(objects.book_dir("..").is_err());
    assert!(objects.book_dir("a/b").is_err());
    assert!(objects.resolve("../elsewhere", "a.pdf").is_err());
    assert_eq!(
        objects.resolve("book-1", "a.pdf").unwrap(),
        dir.path().join("book-1").join("a.pdf")
    );

    assert_eq!(check_book_extension("Book.PDF").unwrap(), "pdf");
    assert_eq!(check_book_extension("book.epub").unwrap(), "epub");
    assert!(check_book_extension("book.mobi").is_err());
    assert!(check_book_extension("book").is_err());
}

#[test]
fn object_store_write_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let objects = ObjectStore::new(dir.path().join("uploads"));

    let name = objects.write_book_file("book-1", "dir/a.pdf", b"pdf").unwrap();
    assert_eq!(name, "a.pdf");
    assert!(objects.write_cover("book-1", "bmp", b"bmp").is_err());
    assert_eq!(objects.write_cover("book-1", ".jpeg", b"jpg").unwrap(), "cover.jpeg");

    assert!(objects.remove_book_dir("book-1").unwrap());
    assert!(!objects.remove_book_dir("book-1").unwrap());
    assert_eq!(objects.root(), dir.path().join("uploads"));
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[storage]
data_dir = "/media/usb/data"
catalog_name = "library.db"
search_depth = 2
standard_install = false

[durability]
throttle_ms = 500

[log]
filter = "babi_rs=debug"
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.storage.data_dir, Some(PathBuf::from("/media/usb/data")));
    assert_eq!(config.storage.catalog_name, "library.db");
    assert_eq!(config.storage.search_depth, 2);
    assert_eq!(config.storage.standard_install, Some(false));
    assert_eq!(config.durability.throttle(), Duration::from_millis(500));
    assert_eq!(config.log.filter, "babi_rs=debug");
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert!(config.storage.data_dir.is_none());
    assert_eq!(config.storage.catalog_name, "babi.db");
    assert_eq!(config.storage.search_depth, 3);
    assert_eq!(config.durability.throttle(), Duration::from_millis(2000));

    let partial: Config = toml::from_str("[durability]\n").unwrap();
    assert_eq!(partial.durability.throttle_ms, 2000);
    assert_eq!(partial.log.filter, "babi_rs=info");
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.storage.catalog_name, "babi.db");
    assert_eq!(config.durability.throttle_ms, 2000);
}

#[test]
fn config_load_reports_bad_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[storage\n").unwrap();
    assert!(matches!(Config::load(&path).unwrap_err(), AppError::Config(_)));
    assert!(matches!(
        Config::load(&dir.path().join("missing.toml")).unwrap_err(),
        AppError::Config(_)
    ));
}
