//! babi-rs command-line entry point.

use babi_rs::{
    catalog::{Catalog, CoverImage, IngestOutcome, IngestRequest},
    config::{AuthorCommand, BookCommand, Cli, Command, Config},
    db::{Book, BookQuery, Digest, MigrationReport},
    library::book::{BookMetadata, BookUpdate},
    library::isbn,
    storage::{LocatorContext, StorageLocator},
};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = &config_path {
        tracing::debug!(config = %path.display(), "Loaded configuration");
    }

    let command = cli.command.clone().unwrap_or(Command::Status);
    if let Command::Init { force } = command {
        write_default_config(force)?;
    }

    let (catalog, report) = open_catalog(&cli, &config)?;

    let result = match command {
        Command::Status | Command::Init { .. } => cmd_status(&catalog),
        Command::Migrate => {
            print_report(&report);
            Ok(())
        }
        Command::Book { action } => cmd_book(action, &catalog),
        Command::Author { action } => cmd_author(action, &catalog),
    };

    // Flush even when the command failed
    let flushed = catalog.shutdown();
    result?;
    flushed?;
    Ok(())
}

/// Resolve storage and open the catalog.
fn open_catalog(cli: &Cli, config: &Config) -> anyhow::Result<(Catalog, MigrationReport)> {
    let storage = &config.storage;
    let ctx = LocatorContext::from_env(
        cli.data_dir.clone().or_else(|| storage.data_dir.clone()),
        storage.objects_dir.clone(),
        storage.standard_install,
    )?;

    let layout = StorageLocator::new(storage.catalog_name.clone(), storage.search_depth)
        .resolve(&ctx)
        .inspect_err(|e| tracing::error!(error = %e, "Cannot resolve storage, aborting"))?;

    let catalog = Catalog::new(layout, config.durability.throttle());
    let report = catalog.open().inspect_err(|e| {
        if e.is_startup_fatal() {
            tracing::error!(error = %e, "Catalog cannot be opened, aborting");
        }
    })?;

    Ok((catalog, report))
}

/// Write the default config file.
fn write_default_config(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());
    Ok(())
}

/// Print storage layout and catalog statistics.
fn cmd_status(catalog: &Catalog) -> anyhow::Result<()> {
    let layout = catalog.layout();
    let store = catalog.store()?;

    println!("Mode:     {:?}", layout.mode);
    println!("Catalog:  {}", layout.catalog_path.display());
    println!("Objects:  {}", layout.object_root.display());
    println!("Books:    {}", store.count_rows("books")?);
    println!("Authors:  {}", store.count_rows("authors")?);
    println!("Links:    {}", store.count_rows("book_authors")?);
    Ok(())
}

fn print_report(report: &MigrationReport) {
    if !report.changed() {
        println!("Catalog schema is up to date.");
        return;
    }

    if !report.tables_created.is_empty() {
        println!("Created tables: {}", report.tables_created.join(", "));
    }
    if !report.columns_added.is_empty() {
        println!("Added columns: {}", report.columns_added.join(", "));
    }
    if report.digests_normalized > 0 {
        println!("Cleared blank digests: {}", report.digests_normalized);
    }
    if let Some(stats) = &report.legacy_authors {
        println!(
            "Migrated authors: {} books, {} authors, {} links ({} skipped)",
            stats.books, stats.authors, stats.links, stats.skipped
        );
    }
}

/// Book management commands.
fn cmd_book(action: BookCommand, catalog: &Catalog) -> anyhow::Result<()> {
    match action {
        BookCommand::Add {
            file,
            title,
            author,
            description,
            category,
            isbn,
            publisher,
            year,
            language,
            pages,
            cover,
            force,
        } => {
            let file_name = file_name_of(&file)?;
            let mut request = IngestRequest::new(file_name, std::fs::read(&file)?);
            request.metadata = BookMetadata {
                title: title.unwrap_or_default(),
                author,
                description,
                category,
                isbn,
                publisher,
                year,
                language,
                page_count: pages,
            };
            request.allow_duplicate = force;
            if let Some(cover) = cover {
                request.cover = Some(CoverImage {
                    extension: extension_of(&cover)?,
                    bytes: std::fs::read(&cover)?,
                });
            }

            match catalog.ingest(request)? {
                IngestOutcome::Ingested(book) => {
                    println!("Added book: {} ({})", book.title, book.id);
                }
                IngestOutcome::Duplicate(existing) => {
                    println!(
                        "Already in catalog: {} ({}). Use --force to add anyway.",
                        existing.title, existing.id
                    );
                }
            }
        }

        BookCommand::List {
            search,
            page,
            limit,
            json,
        } => {
            let query = BookQuery {
                search,
                page,
                limit,
            };
            let books = catalog.list(&query)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&books)?);
            } else if books.is_empty() {
                println!("No books found.");
            } else {
                let total = catalog.count(query.search.as_deref())?;
                println!("{:<36} {:<40} AUTHOR", "ID", "TITLE");
                println!("{}", "-".repeat(100));
                for book in &books {
                    println!(
                        "{:<36} {:<40} {}",
                        book.id,
                        truncate(&book.title, 40),
                        book.author.as_deref().unwrap_or("-")
                    );
                }
                println!("\n{} of {} books (page {})", books.len(), total, query.page);
            }
        }

        BookCommand::Show { id } => {
            let book = catalog
                .get(&id)?
                .ok_or_else(|| anyhow::anyhow!("Book not found: {}", id))?;
            print_book(catalog, &book)?;
        }

        BookCommand::Edit {
            id,
            title,
            author,
            description,
            category,
            isbn,
            publisher,
            year,
            language,
            pages,
        } => {
            let update = BookUpdate {
                title,
                author,
                description,
                category,
                isbn,
                publisher,
                year,
                language,
                page_count: pages,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to change. Pass at least one field.");
            }

            let book = catalog.update_metadata(&id, update)?;
            println!("Updated book: {} ({})", book.title, book.id);
        }

        BookCommand::Cover { id, image } => {
            let bytes = std::fs::read(&image)?;
            let book = catalog.set_cover(&id, &extension_of(&image)?, &bytes)?;
            println!(
                "Cover set for {}: {}",
                book.id,
                book.cover_image.as_deref().unwrap_or("-")
            );
        }

        BookCommand::Del { id } => {
            if catalog.delete(&id)? {
                println!("Deleted book: {}", id);
            } else {
                println!("Book not found: {}", id);
            }
        }

        BookCommand::Check { file } => {
            let digest = Digest::of_file(&file)?;
            match catalog.check_duplicate(&digest)? {
                Some(book) => println!("Duplicate of: {} ({})", book.title, book.id),
                None => println!("Not in catalog ({})", digest),
            }
        }

        BookCommand::Rehash { id } => {
            let digest = catalog.rehash(&id)?;
            println!("{}  {}", digest, id);
        }
    }

    Ok(())
}

/// Author commands.
fn cmd_author(action: AuthorCommand, catalog: &Catalog) -> anyhow::Result<()> {
    match action {
        AuthorCommand::List => {
            let authors = catalog.authors()?;
            if authors.is_empty() {
                println!("No authors found.");
            } else {
                println!("{:<8} NAME", "ID");
                println!("{}", "-".repeat(60));
                for author in authors {
                    println!("{:<8} {}", author.id, author.name);
                }
            }
        }
    }

    Ok(())
}

fn print_book(catalog: &Catalog, book: &Book) -> anyhow::Result<()> {
    let authors: Vec<String> = catalog
        .book_authors(&book.id)?
        .into_iter()
        .map(|a| a.name)
        .collect();

    println!("ID:          {}", book.id);
    println!("Title:       {}", book.title);
    println!("Authors:     {}", authors.join("; "));
    if let Some(isbn_value) = &book.isbn {
        println!("ISBN:        {}", isbn::format(isbn_value));
    }
    for (label, value) in [
        ("Publisher", &book.publisher),
        ("Category", &book.category),
        ("Language", &book.language),
        ("Description", &book.description),
    ] {
        if let Some(value) = value {
            println!("{:<12} {}", format!("{}:", label), value);
        }
    }
    if let Some(year) = book.year {
        println!("Year:        {}", year);
    }
    if let Some(pages) = book.page_count {
        println!("Pages:       {}", pages);
    }
    println!("File:        {}", catalog.file_path(book)?.display());
    if let Some(size) = book.file_size {
        println!("Size:        {} bytes", size);
    }
    println!("Digest:      {}", book.file_hash.as_deref().unwrap_or("-"));
    println!("Added:       {}", book.created_at.as_deref().unwrap_or("-"));
    if let Some(updated) = &book.updated_at {
        println!("Updated:     {}", updated);
    }
    Ok(())
}

fn file_name_of(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))
}

fn extension_of(path: &Path) -> anyhow::Result<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| anyhow::anyhow!("File has no extension: {}", path.display()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
