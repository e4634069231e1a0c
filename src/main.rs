//! fb2-index batch entry point.

use clap::Parser;
use fb2_index::{
    config::{Cli, Command, Config, IndexKind},
    corpus, covers,
    db::Database,
    fill,
    genres::GenreCatalog,
    index::{self, IndexOptions, IndexStats},
    pages::Pages,
};
use rayon::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fb2_index=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::InitDb) => cmd_init_db(&config),
        Some(Command::Fill { hide_deleted }) => cmd_fill(&config, hide_deleted),
        Some(Command::Index { kind, resume }) => cmd_index(&config, kind, resume),
        Some(Command::Covers) => cmd_covers(&config),
        Some(Command::Run) | None => cmd_run(&config),
    }
}

/// Write a default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());
    println!("\nEdit config.toml, then run: fb2-index init-db && fb2-index run");

    Ok(())
}

/// Create tables and load the genre meta-group reference list.
fn cmd_init_db(config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let catalog = GenreCatalog::load(&config.catalog)?;

    let inserted = db.load_genres_meta(catalog.meta_groups())?;
    tracing::info!(
        database = %config.database.path.display(),
        meta_groups = inserted,
        "database initialized"
    );
    Ok(())
}

/// Incremental relational fill over all shards.
fn cmd_fill(config: &Config, hide_deleted: bool) -> anyhow::Result<()> {
    let failed = do_fill(config, hide_deleted)?;
    if failed > 0 {
        anyhow::bail!(
            "{} batches failed to commit; re-run fill to pick up missed rows",
            failed
        );
    }
    Ok(())
}

/// Run the fill and return the number of abandoned batches.
fn do_fill(config: &Config, hide_deleted: bool) -> anyhow::Result<usize> {
    let db = Database::open(&config.database.path)?;
    let catalog = GenreCatalog::load(&config.catalog)?;
    let hide_deleted = hide_deleted || config.fill.hide_deleted;

    let outcome = fill::run_fill(
        &db,
        &catalog,
        &config.corpus.path,
        &config.limits,
        hide_deleted,
    )?;

    tracing::info!(
        books = db.count_books()?,
        authors = db.count_authors()?,
        sequences = db.count_sequences()?,
        genres = db.count_genres()?,
        descriptions = db.count_descriptions()?,
        "storage totals"
    );

    Ok(outcome.failed_batches)
}

/// Build static browse indexes for one kind or all of them.
fn cmd_index(config: &Config, kind: Option<IndexKind>, resume: bool) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let catalog = GenreCatalog::load(&config.catalog)?;
    let pages = Pages::new(&config.pages.path)?;

    let kinds: Vec<IndexKind> = match kind {
        Some(kind) => vec![kind],
        None => vec![IndexKind::Author, IndexKind::Sequence, IndexKind::Genre],
    };

    // The kinds read the same corpus and write disjoint trees, so they
    // can run in parallel; passes inside one kind stay sequential.
    let results: Vec<fb2_index::Result<IndexStats>> = kinds
        .par_iter()
        .map(|kind| run_index_kind(config, *kind, resume, &db, &catalog, &pages))
        .collect();

    let mut failed = 0;
    for (kind, result) in kinds.iter().zip(results) {
        match result {
            Ok(stats) => {
                tracing::info!(?kind, keys = stats.keys, passes = stats.passes, "index built");
            }
            Err(e) => {
                tracing::error!(?kind, error = %e, "index build failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} index kinds failed", failed);
    }
    Ok(())
}

fn run_index_kind(
    config: &Config,
    kind: IndexKind,
    resume: bool,
    db: &Database,
    catalog: &GenreCatalog,
    pages: &Pages,
) -> fb2_index::Result<IndexStats> {
    let opts = IndexOptions {
        max_pass_keys: match kind {
            IndexKind::Genre => config.limits.max_pass_keys_genre,
            _ => config.limits.max_pass_keys,
        },
        hide_deleted: config.fill.hide_deleted,
        resume,
    };

    match kind {
        IndexKind::Author => {
            index::build_author_index(&config.corpus.path, pages, db, catalog, opts)
        }
        IndexKind::Sequence => {
            index::build_sequence_index(&config.corpus.path, pages, db, catalog, opts)
        }
        IndexKind::Genre => {
            index::build_genre_index(&config.corpus.path, pages, db, catalog, opts)
        }
    }
}

/// Extract inline covers onto the sharded cover tree.
fn cmd_covers(config: &Config) -> anyhow::Result<()> {
    // fail fast on a missing corpus before touching the output root
    corpus::list_shards(&config.corpus.path)?;
    covers::extract_covers(&config.corpus.path, &config.covers.path)?;
    Ok(())
}

/// Full pipeline: fill, index all kinds, extract covers.
///
/// A fill batch failure does not block the later stages; missed rows
/// surface on the next run through the existence checks. The process
/// still exits non-zero so the failure is visible.
fn cmd_run(config: &Config) -> anyhow::Result<()> {
    let failed = do_fill(config, false)?;
    cmd_index(config, None, false)?;
    cmd_covers(config)?;

    if failed > 0 {
        anyhow::bail!("{} fill batches failed to commit; re-run to pick up missed rows", failed);
    }
    Ok(())
}
