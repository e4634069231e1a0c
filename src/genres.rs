//! Genre and language reference catalogs.
//!
//! Three pipe-separated reference lists drive genre handling: the
//! canonical genre catalog (`genres.list`), the meta-group names
//! (`genres_meta.list`) and the replacement table for retired genre ids
//! (`genres_replace.list`). Languages get the same replacement treatment
//! from `langs_replace.list`. All four are loaded once per run.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::config::CatalogConfig;
use crate::error::Result;

/// Sentinel genre for records with no usable genre at all.
pub const OTHER_GENRE: &str = "other";

/// Default language when a record carries none.
pub const DEFAULT_LANG: &str = "en";

/// Canonical info for one genre id.
#[derive(Debug, Clone)]
pub struct GenreInfo {
    /// Meta-group id this genre belongs to.
    pub meta_id: String,
    /// Human-readable description.
    pub descr: String,
}

/// Loaded reference catalogs.
#[derive(Debug, Clone, Default)]
pub struct GenreCatalog {
    genres: HashMap<String, GenreInfo>,
    meta: Vec<(String, String)>,
    genre_replaces: HashMap<String, String>,
    lang_replaces: HashMap<String, String>,
}

impl GenreCatalog {
    /// Load all reference lists named in the config.
    pub fn load(catalog: &CatalogConfig) -> Result<Self> {
        let mut ret = Self::default();

        for line in read_list(&catalog.genres)? {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() > 2 {
                ret.genres.insert(
                    fields[1].to_string(),
                    GenreInfo {
                        meta_id: fields[0].to_string(),
                        descr: fields[2].to_string(),
                    },
                );
            }
        }

        for line in read_list(&catalog.genres_meta)? {
            if let Some((meta_id, name)) = line.split_once('|') {
                ret.meta.push((meta_id.to_string(), name.to_string()));
            }
        }

        ret.genre_replaces = read_replaces(&catalog.genres_replace)?;
        ret.lang_replaces = read_replaces(&catalog.langs_replace)?;

        tracing::info!(
            genres = ret.genres.len(),
            meta_groups = ret.meta.len(),
            genre_replaces = ret.genre_replaces.len(),
            "loaded genre catalog"
        );
        Ok(ret)
    }

    /// Look up a canonical genre.
    pub fn get(&self, genre_id: &str) -> Option<&GenreInfo> {
        self.genres.get(genre_id)
    }

    /// Meta-group reference list, in file order.
    pub fn meta_groups(&self) -> &[(String, String)] {
        &self.meta
    }

    /// Map a raw genre id onto the canonical catalog.
    ///
    /// Known ids pass through; retired ids go through the replacement
    /// table; anything else collapses to the sentinel genre.
    pub fn replace_genre(&self, genre_id: &str) -> String {
        if genre_id.is_empty() {
            return OTHER_GENRE.to_string();
        }
        if self.genres.contains_key(genre_id) {
            return genre_id.to_string();
        }
        match self.genre_replaces.get(genre_id) {
            Some(replacement) => replacement.clone(),
            None => OTHER_GENRE.to_string(),
        }
    }

    /// Map a raw language code through the replacement table.
    pub fn replace_lang(&self, lang: &str) -> String {
        if lang.is_empty() {
            return DEFAULT_LANG.to_string();
        }
        match self.lang_replaces.get(lang) {
            Some(replacement) => replacement.clone(),
            None => lang.to_string(),
        }
    }

    /// Catalog for tests: canonical ids with a single meta group.
    #[cfg(test)]
    pub fn for_tests(genre_ids: &[&str]) -> Self {
        let mut ret = Self::default();
        for id in genre_ids {
            ret.genres.insert(
                id.to_string(),
                GenreInfo {
                    meta_id: "1".to_string(),
                    descr: format!("Genre {}", id),
                },
            );
        }
        ret.meta.push(("1".to_string(), "Fiction".to_string()));
        ret
    }
}

/// Read the non-empty lines of a pipe-separated list file.
fn read_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "reference list missing, continuing empty");
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut ret = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\n');
        if !line.is_empty() {
            ret.push(line.to_string());
        }
    }
    Ok(ret)
}

/// Parse a `bad|replacement[,replacement...]` list into a map.
fn read_replaces(path: &Path) -> Result<HashMap<String, String>> {
    let mut ret = HashMap::new();
    for line in read_list(path)? {
        if let Some((from, to)) = line.split_once('|') {
            let replacement: Vec<&str> = to.split(',').collect();
            ret.insert(from.to_string(), replacement.join("|"));
        }
    }
    Ok(ret)
}
