//! Sharded materialization of static index files.
//!
//! Every key (author, sequence, genre) gets its JSON artifacts under a
//! two-level directory fan-out derived from the key itself, so no single
//! directory accumulates the whole corpus. Browse sub-indices (letters,
//! then three-character prefixes) are derived from storage afterwards.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::collate;
use crate::corpus::BookRecord;
use crate::error::Result;

/// Books per genre page file.
const GENRE_PAGE_SIZE: usize = 50;

/// Split a key into its 2-level sharded relative path: `ab/cd/abcd…`.
pub fn id_to_path(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() >= 4 {
        let k12: String = chars[..2].iter().collect();
        let k34: String = chars[2..4].iter().collect();
        format!("{}/{}/{}", k12, k34, id)
    } else if chars.len() >= 2 {
        let k12: String = chars[..2].iter().collect();
        format!("{}/{}", k12, id)
    } else {
        id.to_string()
    }
}

/// Case folding used for browse grouping: upper case plus the letter
/// folds the corpus has always used (Ё→Е, Й→И, Ъ→Ь).
pub fn unicode_upper(s: &str) -> String {
    s.to_uppercase()
        .replace('Ё', "Е")
        .replace('Й', "И")
        .replace('Ъ', "Ь")
}

/// Key metadata artifact (`index.json`).
#[derive(Debug, Serialize)]
pub struct KeyInfo<'a> {
    /// Display name.
    pub name: &'a str,
    /// Key id.
    pub id: &'a str,
}

/// One distinct sequence among an author's books, with occurrence count.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SeqCount {
    /// Display name.
    pub name: String,
    /// Sequence id.
    pub id: String,
    /// Number of contributing books naming this sequence.
    pub cnt: usize,
}

/// Sequence artifact: the key plus its full book list.
#[derive(Debug, Serialize)]
struct SequenceDoc<'a> {
    name: &'a str,
    id: &'a str,
    books: &'a [BookRecord],
}

/// Distinct sequences appearing in a book list, in first-seen order.
pub fn seqs_in_books(books: &[BookRecord]) -> Vec<SeqCount> {
    let mut ret: Vec<SeqCount> = Vec::new();
    for book in books {
        for (id, name) in book.sequence_ids() {
            match ret.iter_mut().find(|s| s.id == id) {
                Some(existing) => existing.cnt += 1,
                None => ret.push(SeqCount { name, id, cnt: 1 }),
            }
        }
    }
    ret
}

/// Ids of books that belong to no sequence.
pub fn sequenceless_books(books: &[BookRecord]) -> Vec<String> {
    books
        .iter()
        .filter(|book| book.sequence_ids().is_empty())
        .map(|book| book.book_id.clone())
        .collect()
}

/// Writer for the materialized JSON tree.
#[derive(Debug, Clone)]
pub struct Pages {
    root: PathBuf,
}

impl Pages {
    /// Create the materializer, ensuring the output root exists.
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            crate::error::AppError::Config(format!(
                "cannot create pages root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Output tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, value)?;
        Ok(())
    }

    /// Materialize one author key.
    pub fn write_author(&self, id: &str, name: &str, books: &[BookRecord]) -> Result<()> {
        let dir = format!("author/{}", id_to_path(id));
        self.write_json(&format!("{}/all.json", dir), &books)?;
        self.write_json(&format!("{}/sequences.json", dir), &seqs_in_books(books))?;
        self.write_json(
            &format!("{}/sequenceless.json", dir),
            &sequenceless_books(books),
        )?;
        self.write_json(&format!("{}/index.json", dir), &KeyInfo { name, id })?;
        Ok(())
    }

    /// Whether an author key is already materialized on disk.
    pub fn author_exists(&self, id: &str) -> bool {
        self.root
            .join(format!("author/{}/index.json", id_to_path(id)))
            .exists()
    }

    /// Materialize one sequence key.
    pub fn write_sequence(&self, id: &str, name: &str, books: &mut Vec<BookRecord>) -> Result<()> {
        // order inside a sequence: number first, title as tie-break
        books.sort_by(|a, b| {
            let num = |r: &BookRecord, id: &str| {
                r.sequences
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .find(|s| s.id.as_deref() == Some(id))
                    .and_then(|s| s.num)
                    .unwrap_or(i64::MAX)
            };
            num(a, id)
                .cmp(&num(b, id))
                .then_with(|| collate::compare_titles(a, b))
        });
        self.write_json(
            &format!("sequence/{}.json", id_to_path(id)),
            &SequenceDoc {
                name,
                id,
                books: &*books,
            },
        )
    }

    /// Materialize one genre key: full id list plus 50-record pages
    /// pre-sorted by title for cheap paginated browsing.
    pub fn write_genre(&self, genre_id: &str, books: &mut Vec<BookRecord>) -> Result<()> {
        let dir = format!("genre/{}", genre_id);

        let ids: Vec<&str> = books.iter().map(|b| b.book_id.as_str()).collect();
        self.write_json(&format!("{}/all.json", dir), &ids)?;

        books.sort_by(collate::compare_titles);
        for (page_no, page) in books.chunks(GENRE_PAGE_SIZE).enumerate() {
            self.write_json(&format!("{}/{}.json", dir, page_no), &page)?;
        }
        Ok(())
    }

    /// Write the letter/prefix browse sub-indices for one entity kind.
    ///
    /// `kind_index` is the tree name, e.g. `authorsindex`. Grouping is by
    /// case-folded name: one file per distinct first letter, one file per
    /// distinct three-character prefix inside the letter (names shorter
    /// than three characters form their own exact-match group).
    pub fn write_name_index(&self, kind_index: &str, entries: &[(String, String)]) -> Result<()> {
        let mut letters: BTreeMap<String, BTreeMap<String, Vec<(String, String)>>> =
            BTreeMap::new();

        for (id, name) in entries {
            let folded = unicode_upper(name);
            let mut chars = folded.chars();
            let Some(first) = chars.next() else {
                continue;
            };
            let letter = sanitize(&first.to_string());
            let prefix: String = folded.chars().take(3).collect();
            letters
                .entry(letter)
                .or_default()
                .entry(sanitize(&prefix))
                .or_default()
                .push((id.clone(), name.clone()));
        }

        let mut letter_list: Vec<&String> = letters.keys().collect();
        letter_list.sort_by(|a, b| collate::compare(a, b));
        self.write_json(&format!("{}/index.json", kind_index), &letter_list)?;

        for (letter, prefixes) in &letters {
            let mut prefix_list: Vec<&String> = prefixes.keys().collect();
            prefix_list.sort_by(|a, b| collate::compare(a, b));
            self.write_json(&format!("{}/{}/index.json", kind_index, letter), &prefix_list)?;

            for (prefix, pairs) in prefixes {
                let mut pairs: Vec<(String, String)> = pairs.clone();
                pairs.sort_by(|a, b| collate::compare(&a.1, &b.1));
                let map: Vec<KeyInfo> = pairs
                    .iter()
                    .map(|(id, name)| KeyInfo {
                        name: name.as_str(),
                        id: id.as_str(),
                    })
                    .collect();
                self.write_json(&format!("{}/{}/{}.json", kind_index, letter, prefix), &map)?;
            }
        }
        Ok(())
    }
}

/// Keep grouped names usable as file names.
fn sanitize(s: &str) -> String {
    s.replace(['/', '\\', '\0'], "_")
}
