use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounded-memory indexer for sharded FB2 ebook archives.
#[derive(Parser, Debug, Clone)]
#[command(name = "fb2-index")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "FB2_INDEX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create database tables and load the genre meta-group list.
    InitDb,

    /// Fill the relational tables from the corpus shards (insert-only).
    Fill {
        /// Skip records flagged as deleted before any existence check.
        #[arg(long)]
        hide_deleted: bool,
    },

    /// Build the static browse indexes for authors, sequences and genres.
    Index {
        /// Restrict to one entity kind.
        #[arg(long, value_enum)]
        kind: Option<IndexKind>,

        /// Seed the processed sets from artifacts already on disk.
        #[arg(long)]
        resume: bool,
    },

    /// Extract inline cover images onto the sharded cover tree.
    Covers,

    /// Fill, then index all kinds, then extract covers.
    Run,

    /// Write a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Entity kinds the aggregator can index.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Author indexes.
    Author,
    /// Sequence indexes.
    Sequence,
    /// Genre indexes.
    Genre,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Corpus input configuration.
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Static pages output configuration.
    #[serde(default)]
    pub pages: PagesConfig,

    /// Cover output configuration.
    #[serde(default)]
    pub covers: CoversConfig,

    /// Memory and pass limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Relational fill configuration.
    #[serde(default)]
    pub fill: FillConfig,

    /// Genre/language reference list locations.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Corpus input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Directory holding `*.zip.list` / `*.zip.list.gz` shards.
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("data/zips")
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/books.db")
}

/// Static pages output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagesConfig {
    /// Root directory for the materialized JSON tree.
    #[serde(default = "default_pages_path")]
    pub path: PathBuf,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            path: default_pages_path(),
        }
    }
}

fn default_pages_path() -> PathBuf {
    PathBuf::from("data/pages")
}

/// Cover output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoversConfig {
    /// Root directory for extracted cover images.
    #[serde(default = "default_covers_path")]
    pub path: PathBuf,
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            path: default_covers_path(),
        }
    }
}

fn default_covers_path() -> PathBuf {
    PathBuf::from("data/covers")
}

/// Memory and pass limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upper bound on cumulative raw-line bytes per fill batch.
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: usize,

    /// Distinct keys held per aggregator pass (authors, sequences).
    #[serde(default = "default_max_pass_keys")]
    pub max_pass_keys: usize,

    /// Distinct keys held per genre pass. Genres collect far more books
    /// per key, so this stays small.
    #[serde(default = "default_max_pass_keys_genre")]
    pub max_pass_keys_genre: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            batch_bytes: default_batch_bytes(),
            max_pass_keys: default_max_pass_keys(),
            max_pass_keys_genre: default_max_pass_keys_genre(),
        }
    }
}

fn default_batch_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_max_pass_keys() -> usize {
    20000
}

fn default_max_pass_keys_genre() -> usize {
    5
}

/// Relational fill configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillConfig {
    /// Skip records flagged as deleted.
    #[serde(default)]
    pub hide_deleted: bool,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            hide_deleted: false,
        }
    }
}

/// Genre/language reference list locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// `meta_id|genre_id|description` rows.
    #[serde(default = "default_genres_list")]
    pub genres: PathBuf,

    /// `meta_id|name` rows.
    #[serde(default = "default_genres_meta_list")]
    pub genres_meta: PathBuf,

    /// `bad_id|replacement[,replacement...]` rows.
    #[serde(default = "default_genres_replace_list")]
    pub genres_replace: PathBuf,

    /// `bad_lang|replacement` rows.
    #[serde(default = "default_langs_replace_list")]
    pub langs_replace: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            genres: default_genres_list(),
            genres_meta: default_genres_meta_list(),
            genres_replace: default_genres_replace_list(),
            langs_replace: default_langs_replace_list(),
        }
    }
}

fn default_genres_list() -> PathBuf {
    PathBuf::from("genres.list")
}

fn default_genres_meta_list() -> PathBuf {
    PathBuf::from("genres_meta.list")
}

fn default_genres_replace_list() -> PathBuf {
    PathBuf::from("genres_replace.list")
}

fn default_langs_replace_list() -> PathBuf {
    PathBuf::from("langs_replace.list")
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("fb2-index.toml"),
            dirs::config_dir()
                .map(|p| p.join("fb2-index").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/fb2-index/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# fb2-index configuration

[corpus]
# Directory with *.zip.list / *.zip.list.gz metadata shards
path = "data/zips"

[database]
path = "data/books.db"

[pages]
# Root of the materialized JSON index tree
path = "data/pages"

[covers]
path = "data/covers"

[limits]
# Bytes of raw shard lines accumulated per fill batch
batch_bytes = 8388608
# Distinct author/sequence keys held in memory per indexing pass
max_pass_keys = 20000
# Distinct genre keys held per pass (genres gather many more books)
max_pass_keys_genre = 5

[fill]
hide_deleted = false

[catalog]
genres = "genres.list"
genres_meta = "genres_meta.list"
genres_replace = "genres_replace.list"
langs_replace = "langs_replace.list"
"#
        .to_string()
    }
}
