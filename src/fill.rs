//! Incremental relational fill.
//!
//! Converts batches of parsed book records into entity rows and commits
//! only what storage does not already hold. The fill is insert-only:
//! existing ids are silently skipped and nothing is ever updated or
//! deleted, which makes a re-run after a partial failure naturally
//! idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

use crate::config::LimitsConfig;
use crate::corpus::{BatchReader, BookRecord};
use crate::db::{Author, BookRow, Database, Description, Genre, Sequence};
use crate::error::Result;
use crate::genres::GenreCatalog;

/// Rows inserted by one or more fill batches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FillStats {
    /// New author rows.
    pub authors: usize,
    /// New sequence rows.
    pub sequences: usize,
    /// New genre rows.
    pub genres: usize,
    /// New book rows.
    pub books: usize,
    /// New description rows.
    pub descriptions: usize,
}

impl FillStats {
    fn add(&mut self, other: FillStats) {
        self.authors += other.authors;
        self.sequences += other.sequences;
        self.genres += other.genres;
        self.books += other.books;
        self.descriptions += other.descriptions;
    }
}

/// Result of a whole fill run.
#[derive(Debug, Default)]
pub struct FillOutcome {
    /// Rows inserted across all committed batches.
    pub stats: FillStats,
    /// Batches abandoned after a storage failure.
    pub failed_batches: usize,
}

/// Fill one batch of records into storage.
///
/// One bulk existence query per entity kind for the whole batch, then a
/// single transactional insert of everything new.
pub fn fill_batch(
    db: &Database,
    catalog: &GenreCatalog,
    mut batch: Vec<BookRecord>,
    hide_deleted: bool,
) -> Result<FillStats> {
    if hide_deleted {
        batch.retain(|record| !record.is_deleted());
    }
    for record in &mut batch {
        record.refine(catalog);
    }

    // Candidate entities referenced anywhere in the batch. BTree keeps
    // insert order deterministic across runs.
    let mut author_names: BTreeMap<String, String> = BTreeMap::new();
    let mut seq_names: BTreeMap<String, String> = BTreeMap::new();
    let mut genre_ids: BTreeSet<String> = BTreeSet::new();
    let mut book_ids: Vec<String> = Vec::new();

    for record in &batch {
        if let Some(authors) = &record.authors {
            for author in authors {
                author_names
                    .entry(author.id.clone())
                    .or_insert_with(|| author.name.clone());
            }
        }
        for (id, name) in record.sequence_ids() {
            seq_names.entry(id).or_insert(name);
        }
        if let Some(genres) = &record.genres {
            for genre in genres {
                genre_ids.insert(genre.clone());
            }
        }
        if !book_ids.contains(&record.book_id) {
            book_ids.push(record.book_id.clone());
        }
    }

    let author_ids: Vec<String> = author_names.keys().cloned().collect();
    let existing = db.existing_authors(&author_ids)?;
    let new_authors: Vec<Author> = author_names
        .iter()
        .filter(|(id, _)| !existing.contains(*id))
        .map(|(id, name)| Author {
            id: id.clone(),
            name: name.clone(),
        })
        .collect();

    let seq_ids: Vec<String> = seq_names.keys().cloned().collect();
    let existing = db.existing_sequences(&seq_ids)?;
    let new_sequences: Vec<Sequence> = seq_names
        .iter()
        .filter(|(id, _)| !existing.contains(*id))
        .map(|(id, name)| Sequence {
            id: id.clone(),
            name: name.clone(),
        })
        .collect();

    let genre_list: Vec<String> = genre_ids.iter().cloned().collect();
    let existing = db.existing_genres(&genre_list)?;
    let mut new_genres: Vec<Genre> = Vec::new();
    for id in genre_ids {
        if existing.contains(&id) {
            continue;
        }
        match catalog.get(&id) {
            Some(info) => new_genres.push(Genre {
                id: id.clone(),
                meta_id: info.meta_id.clone(),
                name: info.descr.clone(),
            }),
            None => {
                tracing::debug!(genre = %id, "genre absent from catalog, not persisted");
            }
        }
    }

    let existing = db.existing_books(&book_ids)?;
    let mut new_books: Vec<BookRow> = Vec::new();
    let mut new_descriptions: Vec<Description> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for record in &batch {
        if existing.contains(&record.book_id) || !seen.insert(record.book_id.as_str()) {
            continue;
        }

        let authors = record
            .authors
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|a| a.id.clone())
            .collect();
        let sequences = record
            .sequence_ids()
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        new_books.push(BookRow {
            book_id: record.book_id.clone(),
            zipfile: record.zipfile.clone(),
            filename: record.filename.clone(),
            genres: record.genres.clone().unwrap_or_default(),
            authors,
            sequences,
            lang: record.lang.clone(),
            date: normalize_date(record),
            size: record.size,
            deleted: record.is_deleted(),
        });

        let pubinfo = record.pub_info.clone().unwrap_or_default();
        new_descriptions.push(Description {
            book_id: record.book_id.clone(),
            book_title: record.book_title.clone(),
            pub_isbn: pubinfo.isbn,
            pub_year: pubinfo.year,
            publisher: pubinfo.publisher,
            publisher_id: pubinfo.publisher_id,
            annotation: record.annotation.clone(),
        });
    }

    let stats = FillStats {
        authors: new_authors.len(),
        sequences: new_sequences.len(),
        genres: new_genres.len(),
        books: new_books.len(),
        descriptions: new_descriptions.len(),
    };

    db.insert_batch(
        &new_authors,
        &new_sequences,
        &new_genres,
        &new_books,
        &new_descriptions,
    )?;

    Ok(stats)
}

/// Normalize the archive timestamp to `YYYY-MM-DD`.
fn normalize_date(record: &BookRecord) -> String {
    let raw = record.date_time.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return dt.date().to_string();
    }
    tracing::debug!(
        zipfile = %record.zipfile,
        filename = %record.filename,
        date = raw,
        "unparsable archive date"
    );
    String::new()
}

/// Run the fill over every shard of the corpus.
///
/// The genre meta-group list is loaded up front (insert-only, so a
/// prior `init-db` is not required); genre rows reference it. A batch
/// that fails to commit is abandoned and logged; the run continues with
/// the next batch and the outcome records the failure so the process
/// can exit non-zero. A re-run picks the missed rows back up through
/// the existence checks.
pub fn run_fill(
    db: &Database,
    catalog: &GenreCatalog,
    corpus_dir: &Path,
    limits: &LimitsConfig,
    hide_deleted: bool,
) -> Result<FillOutcome> {
    db.load_genres_meta(catalog.meta_groups())?;

    let mut outcome = FillOutcome::default();
    let mut batch_no = 0usize;

    for batch in BatchReader::new(corpus_dir, limits.batch_bytes)? {
        let batch = batch?;
        batch_no += 1;

        match fill_batch(db, catalog, batch, hide_deleted) {
            Ok(stats) => {
                tracing::debug!(
                    batch = batch_no,
                    books = stats.books,
                    authors = stats.authors,
                    "batch committed"
                );
                outcome.stats.add(stats);
            }
            Err(e) => {
                tracing::error!(batch = batch_no, error = %e, "batch abandoned");
                outcome.failed_batches += 1;
            }
        }
    }

    tracing::info!(
        batches = batch_no,
        failed = outcome.failed_batches,
        books = outcome.stats.books,
        authors = outcome.stats.authors,
        sequences = outcome.stats.sequences,
        genres = outcome.stats.genres,
        "fill complete"
    );
    Ok(outcome)
}
