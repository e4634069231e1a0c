use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, params, params_from_iter};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// SQLite keeps a hard cap on bound variables; stay well under it.
const IN_CHUNK: usize = 500;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                book_id TEXT PRIMARY KEY,
                zipfile TEXT NOT NULL,
                filename TEXT NOT NULL,
                genres TEXT NOT NULL,
                authors TEXT NOT NULL,
                sequences TEXT NOT NULL,
                lang TEXT,
                date TEXT,
                size INTEGER,
                deleted INTEGER NOT NULL DEFAULT 0
            );

            -- Book descriptions and publish info
            CREATE TABLE IF NOT EXISTS book_descr (
                book_id TEXT PRIMARY KEY,
                book_title TEXT,
                pub_isbn TEXT,
                pub_year TEXT,
                publisher TEXT,
                publisher_id TEXT,
                annotation TEXT,
                FOREIGN KEY (book_id) REFERENCES books(book_id)
            );

            -- Authors table
            CREATE TABLE IF NOT EXISTS authors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                info TEXT NOT NULL DEFAULT ''
            );

            -- Sequences table
            CREATE TABLE IF NOT EXISTS sequences (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                info TEXT NOT NULL DEFAULT ''
            );

            -- Genre meta groups
            CREATE TABLE IF NOT EXISTS genres_meta (
                meta_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            );

            -- Genres table
            CREATE TABLE IF NOT EXISTS genres (
                id TEXT PRIMARY KEY,
                meta_id TEXT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (meta_id) REFERENCES genres_meta(meta_id)
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_zipfile ON books(zipfile);
            CREATE INDEX IF NOT EXISTS idx_books_filename ON books(filename);
            CREATE INDEX IF NOT EXISTS idx_authors_name ON authors(name);
            CREATE INDEX IF NOT EXISTS idx_sequences_name ON sequences(name);
            CREATE INDEX IF NOT EXISTS idx_descr_title ON book_descr(book_title);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Ids from `ids` that already exist in `table`, one bulk query per chunk.
    fn existing_ids(&self, table: &str, key: &str, ids: &[String]) -> Result<HashSet<String>> {
        let conn = self.conn.lock();
        let mut ret = HashSet::new();

        for chunk in ids.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("SELECT {} FROM {} WHERE {} IN ({})", key, table, key, placeholders);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            for id in rows {
                ret.insert(id?);
            }
        }
        Ok(ret)
    }

    /// Author ids already present in storage.
    pub fn existing_authors(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_ids("authors", "id", ids)
    }

    /// Sequence ids already present in storage.
    pub fn existing_sequences(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_ids("sequences", "id", ids)
    }

    /// Genre ids already present in storage.
    pub fn existing_genres(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_ids("genres", "id", ids)
    }

    /// Book ids already present in storage.
    pub fn existing_books(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_ids("books", "book_id", ids)
    }

    /// Commit one fill batch atomically: new entities, books, descriptions.
    pub fn insert_batch(
        &self,
        authors: &[Author],
        sequences: &[Sequence],
        genres: &[Genre],
        books: &[BookRow],
        descriptions: &[Description],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for author in authors {
            tx.execute(
                "INSERT OR IGNORE INTO authors (id, name) VALUES (?1, ?2)",
                params![author.id, author.name],
            )?;
        }
        for seq in sequences {
            tx.execute(
                "INSERT OR IGNORE INTO sequences (id, name) VALUES (?1, ?2)",
                params![seq.id, seq.name],
            )?;
        }
        for genre in genres {
            tx.execute(
                "INSERT OR IGNORE INTO genres (id, meta_id, name) VALUES (?1, ?2, ?3)",
                params![genre.id, genre.meta_id, genre.name],
            )?;
        }
        for book in books {
            tx.execute(
                "INSERT OR IGNORE INTO books
                 (book_id, zipfile, filename, genres, authors, sequences, lang, date, size, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    book.book_id,
                    book.zipfile,
                    book.filename,
                    serde_json::to_string(&book.genres)?,
                    serde_json::to_string(&book.authors)?,
                    serde_json::to_string(&book.sequences)?,
                    book.lang,
                    book.date,
                    book.size,
                    book.deleted,
                ],
            )?;
        }
        for descr in descriptions {
            tx.execute(
                "INSERT OR IGNORE INTO book_descr
                 (book_id, book_title, pub_isbn, pub_year, publisher, publisher_id, annotation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    descr.book_id,
                    descr.book_title,
                    descr.pub_isbn,
                    descr.pub_year,
                    descr.publisher,
                    descr.publisher_id,
                    descr.annotation,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the genre meta-group reference list, inserting missing rows only.
    pub fn load_genres_meta(&self, meta: &[(String, String)]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for (meta_id, name) in meta {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO genres_meta (meta_id, name) VALUES (?1, ?2)",
                params![meta_id, name],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// All author rows, for browse sub-index construction.
    pub fn all_authors(&self) -> Result<Vec<Author>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name FROM authors")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Author {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All sequence rows, for browse sub-index construction.
    pub fn all_sequences(&self) -> Result<Vec<Sequence>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name FROM sequences")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Sequence {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Row count of a table, for progress logging.
    fn count(&self, table: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Number of author rows.
    pub fn count_authors(&self) -> Result<i64> {
        self.count("authors")
    }

    /// Number of sequence rows.
    pub fn count_sequences(&self) -> Result<i64> {
        self.count("sequences")
    }

    /// Number of genre rows.
    pub fn count_genres(&self) -> Result<i64> {
        self.count("genres")
    }

    /// Number of book rows.
    pub fn count_books(&self) -> Result<i64> {
        self.count("books")
    }

    /// Number of description rows.
    pub fn count_descriptions(&self) -> Result<i64> {
        self.count("book_descr")
    }
}
