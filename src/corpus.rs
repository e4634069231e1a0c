//! Metadata stream reader for the sharded corpus.
//!
//! Each shard is a `*.zip.list` (or gzipped `*.zip.list.gz`) file of
//! newline-delimited JSON book records, one shard per source archive.
//! Shards are always visited in lexicographic filename order so that
//! repeated runs see the corpus in the same sequence. A malformed line
//! is logged and skipped; it never aborts the shard.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::genres::GenreCatalog;

/// Display name used when a record carries no authors at all.
pub const AUTHOR_PLACEHOLDER: &str = "Неизвестный автор";

/// Author reference inside a book record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRef {
    /// Stable author id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Sequence (series) reference inside a book record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRef {
    /// Stable sequence id. Some records carry a name without an id.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Position of the book within the sequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num: Option<i64>,
}

/// Publication info block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PubInfo {
    /// ISBN, when known.
    pub isbn: Option<String>,
    /// Publication year as printed in the source.
    pub year: Option<String>,
    /// Publisher display name.
    pub publisher: Option<String>,
    /// Stable publisher id.
    pub publisher_id: Option<String>,
}

/// Inline cover payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cover {
    /// MIME type reported by the producer.
    #[serde(rename = "content-type")]
    pub content_type: Option<String>,
    /// Base64 image data, possibly truncated upstream.
    pub data: String,
}

/// One parsed book record from a metadata shard.
///
/// Records are transient: parsed per line, contributed to a batch or an
/// accumulator, then dropped. They are never retained corpus-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRecord {
    /// Stable content hash of the book.
    pub book_id: String,
    /// Source archive name.
    #[serde(default)]
    pub zipfile: String,
    /// Filename inside the archive.
    #[serde(default)]
    pub filename: String,
    /// Authors; `None` before refinement means the field was absent.
    pub authors: Option<Vec<AuthorRef>>,
    /// Sequences the book belongs to.
    pub sequences: Option<Vec<SequenceRef>>,
    /// Genre ids.
    pub genres: Option<Vec<String>>,
    /// Language code.
    #[serde(default)]
    pub lang: String,
    /// Archive timestamp of the book.
    #[serde(default)]
    pub date_time: String,
    /// Uncompressed size in bytes.
    #[serde(default)]
    pub size: i64,
    /// Deletion flag; the producer writes 0/1, older shards a bool.
    #[serde(default, deserialize_with = "de_flag")]
    pub deleted: i64,
    /// Title.
    #[serde(default)]
    pub book_title: String,
    /// Annotation text.
    #[serde(default)]
    pub annotation: String,
    /// Publication info.
    pub pub_info: Option<PubInfo>,
    /// Inline cover; stripped by [`BookRecord::refine`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<Cover>,
}

/// Accept an integer or a boolean for the deleted flag.
fn de_flag<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Bool(b) => Ok(i64::from(b)),
        serde_json::Value::Number(n) => Ok(n.as_i64().unwrap_or(0)),
        serde_json::Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "unexpected deleted flag: {}",
            other
        ))),
    }
}

impl BookRecord {
    /// Whether the producer flagged this record deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted != 0
    }

    /// Normalize a record before it enters any index artifact.
    ///
    /// Strips the inline cover, defaults missing genres to the sentinel
    /// genre and remaps retired genre ids, repairs the language, and
    /// substitutes the deterministic placeholder author when the record
    /// has none.
    pub fn refine(&mut self, catalog: &GenreCatalog) {
        self.cover = None;

        let raw_genres = self.genres.take().unwrap_or_default();
        let mut genres: Vec<String> = Vec::new();
        for genre in &raw_genres {
            let mapped = catalog.replace_genre(genre);
            if !genres.contains(&mapped) {
                genres.push(mapped);
            }
        }
        if genres.is_empty() {
            genres.push(crate::genres::OTHER_GENRE.to_string());
        }
        self.genres = Some(genres);

        self.lang = catalog.replace_lang(&self.lang);

        if self.authors.as_ref().is_none_or(|a| a.is_empty()) {
            self.authors = Some(vec![placeholder_author()]);
        }
    }

    /// Sequence ids present on this record.
    pub fn sequence_ids(&self) -> Vec<(String, String)> {
        let mut ret = Vec::new();
        if let Some(seqs) = &self.sequences {
            for seq in seqs {
                if let (Some(id), Some(name)) = (&seq.id, &seq.name) {
                    ret.push((id.clone(), name.clone()));
                }
            }
        }
        ret
    }
}

/// The deterministic placeholder for author-less records.
pub fn placeholder_author() -> AuthorRef {
    let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, AUTHOR_PLACEHOLDER.as_bytes());
    AuthorRef {
        id: id.simple().to_string(),
        name: AUTHOR_PLACEHOLDER.to_string(),
    }
}

/// Enumerate corpus shards in lexicographic filename order.
pub fn list_shards(corpus_dir: &Path) -> Result<Vec<PathBuf>> {
    if !corpus_dir.is_dir() {
        return Err(AppError::Config(format!(
            "corpus directory does not exist: {}",
            corpus_dir.display()
        )));
    }

    let mut shards: Vec<PathBuf> = std::fs::read_dir(corpus_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".zip.list") || n.ends_with(".zip.list.gz"))
        })
        .collect();
    shards.sort();
    Ok(shards)
}

/// Open one shard, transparently decompressing `.gz`.
pub fn open_shard(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let is_gz = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".gz"));

    if is_gz {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Shard name for log context.
fn shard_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
}

/// Stream every record of every shard, in shard order.
///
/// The callback receives the shard name for log context. Parse failures
/// are logged and skipped here so every caller shares the same policy.
pub fn for_each_record<F>(corpus_dir: &Path, mut handler: F) -> Result<()>
where
    F: FnMut(&str, BookRecord) -> Result<()>,
{
    for shard in list_shards(corpus_dir)? {
        let name = shard_name(&shard).to_string();
        let reader = open_shard(&shard)?;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BookRecord>(&line) {
                Ok(record) => handler(&name, record)?,
                Err(e) => {
                    tracing::warn!(
                        shard = %name,
                        line = line_no + 1,
                        error = %e,
                        "skipping malformed record"
                    );
                }
            }
        }
    }
    Ok(())
}

/// Pull-based batches of records bounded by cumulative raw-line bytes.
///
/// The bound is on bytes, not row count: it is what caps peak memory on
/// small hardware regardless of how fat individual records are.
pub struct BatchReader {
    shards: std::vec::IntoIter<PathBuf>,
    current: Option<(String, std::io::Lines<Box<dyn BufRead>>)>,
    line_no: usize,
    batch_bytes: usize,
}

impl BatchReader {
    /// Create a batch reader over all shards of the corpus directory.
    pub fn new(corpus_dir: &Path, batch_bytes: usize) -> Result<Self> {
        Ok(Self {
            shards: list_shards(corpus_dir)?.into_iter(),
            current: None,
            line_no: 0,
            batch_bytes,
        })
    }

    /// Pull the next raw line, advancing across shard boundaries.
    fn next_line(&mut self) -> Result<Option<(String, String, usize)>> {
        loop {
            if let Some((name, lines)) = &mut self.current {
                match lines.next() {
                    Some(line) => {
                        self.line_no += 1;
                        return Ok(Some((name.clone(), line?, self.line_no)));
                    }
                    None => self.current = None,
                }
            }

            match self.shards.next() {
                Some(shard) => {
                    let name = shard_name(&shard).to_string();
                    tracing::info!(shard = %name, "reading shard");
                    let reader = open_shard(&shard)?;
                    self.current = Some((name, reader.lines()));
                    self.line_no = 0;
                }
                None => return Ok(None),
            }
        }
    }
}

impl Iterator for BatchReader {
    type Item = Result<Vec<BookRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::new();
        let mut bytes = 0usize;

        loop {
            match self.next_line() {
                Ok(Some((shard, line, line_no))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    bytes += line.len();
                    match serde_json::from_str::<BookRecord>(&line) {
                        Ok(record) => batch.push(record),
                        Err(e) => {
                            tracing::warn!(
                                shard = %shard,
                                line = line_no,
                                error = %e,
                                "skipping malformed record"
                            );
                        }
                    }
                    if bytes >= self.batch_bytes {
                        return Some(Ok(batch));
                    }
                }
                Ok(None) => {
                    if batch.is_empty() {
                        return None;
                    }
                    return Some(Ok(batch));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
