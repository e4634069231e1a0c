mod schema;

pub use schema::Database;

use serde::{Deserialize, Serialize};

/// Author row. Written once, never mutated by this tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    /// Stable author id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Sequence (series) row. Written once, never mutated by this tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    /// Stable sequence id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Genre row, grouped under a meta group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    /// Canonical genre id.
    pub id: String,
    /// Meta-group id.
    pub meta_id: String,
    /// Canonical description.
    pub name: String,
}

/// Genre meta-group row, loaded once from the reference list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreMeta {
    /// Meta-group id.
    pub meta_id: String,
    /// Display name.
    pub name: String,
}

/// Book row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRow {
    /// Stable content hash of the book.
    pub book_id: String,
    /// Source archive name.
    pub zipfile: String,
    /// Filename inside the archive.
    pub filename: String,
    /// Genre ids (stored as a JSON array).
    pub genres: Vec<String>,
    /// Author ids (stored as a JSON array).
    pub authors: Vec<String>,
    /// Sequence ids (stored as a JSON array).
    pub sequences: Vec<String>,
    /// Language code.
    pub lang: String,
    /// Normalized archive date (`YYYY-MM-DD`), empty when unparsable.
    pub date: String,
    /// Uncompressed size in bytes.
    pub size: i64,
    /// Deletion flag.
    pub deleted: bool,
}

/// Book description row, 1:1 with a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Description {
    /// Book id.
    pub book_id: String,
    /// Title.
    pub book_title: String,
    /// ISBN, when known.
    pub pub_isbn: Option<String>,
    /// Publication year as printed in the source.
    pub pub_year: Option<String>,
    /// Publisher display name.
    pub publisher: Option<String>,
    /// Stable publisher id.
    pub publisher_id: Option<String>,
    /// Annotation text.
    pub annotation: String,
}
