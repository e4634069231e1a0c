//! Bounded-memory multi-pass index aggregation.
//!
//! The corpus holds far more distinct authors than fit in memory next to
//! their books, so each entity kind is indexed in passes: every pass
//! re-reads the whole corpus but admits at most a capped number of new
//! keys into its accumulator. Keys already materialized are tracked in a
//! processed set owned by the run, so every key lands in exactly one
//! pass. Repeated corpus I/O is the price of a hard memory ceiling;
//! that is the intended tradeoff for small hardware.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use walkdir::WalkDir;

use crate::corpus::{self, BookRecord};
use crate::db::Database;
use crate::error::Result;
use crate::genres::GenreCatalog;
use crate::pages::Pages;

/// Keys materialized during a run, per entity kind.
///
/// Owned by one aggregator invocation; it never outlives the run. With
/// resume enabled the initial content is re-derived from the artifacts
/// already on disk.
pub type ProcessedKeySet = HashSet<String>;

/// Outcome of one aggregator run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Distinct keys materialized by this run.
    pub keys: usize,
    /// Full corpus scans performed.
    pub passes: usize,
}

/// Shared knobs for one aggregator run.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// Accumulator cap: distinct new keys admitted per pass.
    pub max_pass_keys: usize,
    /// Drop deleted records before key extraction.
    pub hide_deleted: bool,
    /// Seed the processed set from artifacts already on disk.
    pub resume: bool,
}

/// Build all author indexes, then the author browse sub-index.
pub fn build_author_index(
    corpus_dir: &Path,
    pages: &Pages,
    db: &Database,
    catalog: &GenreCatalog,
    opts: IndexOptions,
) -> Result<IndexStats> {
    let mut processed: ProcessedKeySet = if opts.resume {
        seed_from_dir_tree(pages.root().join("author"), "index.json")
    } else {
        ProcessedKeySet::new()
    };
    let total = db.count_authors().unwrap_or(0);
    tracing::info!(total, resumed = processed.len(), "creating author indexes");

    let mut stats = IndexStats::default();
    loop {
        let in_pass = author_pass(corpus_dir, pages, catalog, &opts, &mut processed)?;
        if in_pass == 0 {
            break;
        }
        stats.passes += 1;
        stats.keys += in_pass;
        tracing::debug!(
            pass = stats.passes,
            in_pass,
            processed = processed.len(),
            total,
            "author pass done"
        );
    }

    let entries: Vec<(String, String)> = db
        .all_authors()?
        .into_iter()
        .map(|a| (a.id, a.name))
        .collect();
    pages.write_name_index("authorsindex", &entries)?;

    Ok(stats)
}

/// One author pass: stream the corpus, accumulate under the cap,
/// materialize everything accumulated.
fn author_pass(
    corpus_dir: &Path,
    pages: &Pages,
    catalog: &GenreCatalog,
    opts: &IndexOptions,
    processed: &mut ProcessedKeySet,
) -> Result<usize> {
    let mut acc: HashMap<String, (String, Vec<BookRecord>)> = HashMap::new();

    corpus::for_each_record(corpus_dir, |_shard, mut record| {
        if opts.hide_deleted && record.is_deleted() {
            return Ok(());
        }
        record.refine(catalog);
        let authors = record.authors.clone().unwrap_or_default();
        for author in authors {
            if processed.contains(&author.id) {
                continue;
            }
            if let Some((_, books)) = acc.get_mut(&author.id) {
                books.push(record.clone());
            } else if acc.len() < opts.max_pass_keys {
                acc.insert(author.id, (author.name, vec![record.clone()]));
            }
            // over the cap: dropped now, picked up by a later pass
        }
        Ok(())
    })?;

    for (id, (name, books)) in &acc {
        pages.write_author(id, name, books)?;
        processed.insert(id.clone());
    }
    Ok(acc.len())
}

/// Build all sequence indexes, then the sequence browse sub-index.
pub fn build_sequence_index(
    corpus_dir: &Path,
    pages: &Pages,
    db: &Database,
    catalog: &GenreCatalog,
    opts: IndexOptions,
) -> Result<IndexStats> {
    let mut processed: ProcessedKeySet = if opts.resume {
        seed_from_file_stems(pages.root().join("sequence"))
    } else {
        ProcessedKeySet::new()
    };
    let total = db.count_sequences().unwrap_or(0);
    tracing::info!(total, resumed = processed.len(), "creating sequence indexes");

    let mut stats = IndexStats::default();
    loop {
        let in_pass = sequence_pass(corpus_dir, pages, catalog, &opts, &mut processed)?;
        if in_pass == 0 {
            break;
        }
        stats.passes += 1;
        stats.keys += in_pass;
        tracing::debug!(
            pass = stats.passes,
            in_pass,
            processed = processed.len(),
            total,
            "sequence pass done"
        );
    }

    let entries: Vec<(String, String)> = db
        .all_sequences()?
        .into_iter()
        .map(|s| (s.id, s.name))
        .collect();
    pages.write_name_index("sequencesindex", &entries)?;

    Ok(stats)
}

fn sequence_pass(
    corpus_dir: &Path,
    pages: &Pages,
    catalog: &GenreCatalog,
    opts: &IndexOptions,
    processed: &mut ProcessedKeySet,
) -> Result<usize> {
    let mut acc: HashMap<String, (String, Vec<BookRecord>)> = HashMap::new();

    corpus::for_each_record(corpus_dir, |_shard, mut record| {
        if opts.hide_deleted && record.is_deleted() {
            return Ok(());
        }
        record.refine(catalog);
        for (id, name) in record.sequence_ids() {
            if processed.contains(&id) {
                continue;
            }
            if let Some((_, books)) = acc.get_mut(&id) {
                books.push(record.clone());
            } else if acc.len() < opts.max_pass_keys {
                acc.insert(id, (name, vec![record.clone()]));
            }
        }
        Ok(())
    })?;

    for (id, (name, books)) in &mut acc {
        pages.write_sequence(id, name, books)?;
        processed.insert(id.clone());
    }
    Ok(acc.len())
}

/// Build all genre indexes. Genres get no letter sub-index; the genre
/// tree is browsed through the meta groups instead.
pub fn build_genre_index(
    corpus_dir: &Path,
    pages: &Pages,
    db: &Database,
    catalog: &GenreCatalog,
    opts: IndexOptions,
) -> Result<IndexStats> {
    let mut processed: ProcessedKeySet = if opts.resume {
        seed_from_subdirs(pages.root().join("genre"))
    } else {
        ProcessedKeySet::new()
    };
    let total = db.count_genres().unwrap_or(0);
    tracing::info!(total, resumed = processed.len(), "creating genre indexes");

    let mut stats = IndexStats::default();
    loop {
        let in_pass = genre_pass(corpus_dir, pages, catalog, &opts, &mut processed)?;
        if in_pass == 0 {
            break;
        }
        stats.passes += 1;
        stats.keys += in_pass;
        tracing::debug!(
            pass = stats.passes,
            in_pass,
            processed = processed.len(),
            total,
            "genre pass done"
        );
    }
    Ok(stats)
}

fn genre_pass(
    corpus_dir: &Path,
    pages: &Pages,
    catalog: &GenreCatalog,
    opts: &IndexOptions,
    processed: &mut ProcessedKeySet,
) -> Result<usize> {
    let mut acc: HashMap<String, Vec<BookRecord>> = HashMap::new();

    corpus::for_each_record(corpus_dir, |_shard, mut record| {
        if opts.hide_deleted && record.is_deleted() {
            return Ok(());
        }
        record.refine(catalog);
        let genres = record.genres.clone().unwrap_or_default();
        for genre in genres {
            if processed.contains(&genre) {
                continue;
            }
            if let Some(books) = acc.get_mut(&genre) {
                books.push(record.clone());
            } else if acc.len() < opts.max_pass_keys {
                acc.insert(genre, vec![record.clone()]);
            }
        }
        Ok(())
    })?;

    for (genre, books) in &mut acc {
        pages.write_genre(genre, books)?;
        processed.insert(genre.clone());
    }
    Ok(acc.len())
}

/// Keys whose per-key directory already holds `marker` (author layout).
fn seed_from_dir_tree(root: std::path::PathBuf, marker: &str) -> ProcessedKeySet {
    let mut ret = ProcessedKeySet::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file()
            && entry.file_name().to_str() == Some(marker)
            && let Some(id) = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
        {
            ret.insert(id.to_string());
        }
    }
    ret
}

/// Keys materialized as single `<id>.json` files (sequence layout).
fn seed_from_file_stems(root: std::path::PathBuf) -> ProcessedKeySet {
    let mut ret = ProcessedKeySet::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file()
            && let Some(name) = entry.file_name().to_str()
            && let Some(stem) = name.strip_suffix(".json")
        {
            ret.insert(stem.to_string());
        }
    }
    ret
}

/// Keys materialized as one directory per key (genre layout).
fn seed_from_subdirs(root: std::path::PathBuf) -> ProcessedKeySet {
    let mut ret = ProcessedKeySet::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.filter_map(|e| e.ok()) {
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                ret.insert(name.to_string());
            }
        }
    }
    ret
}
