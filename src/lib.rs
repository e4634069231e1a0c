//! fb2-index: bounded-memory indexer for sharded FB2 ebook archives.
//!
//! This crate ingests line-delimited JSON metadata shards describing a
//! large e-book corpus and produces two artifacts: relational rows
//! (books, authors, sequences, genres) in SQLite, and a tree of static
//! JSON index files for browsing authors/sequences/genres without
//! per-request aggregation. It is built to run on constrained hardware:
//! memory use is capped by byte-bounded batches and by a multi-pass
//! aggregator that trades repeated corpus reads for a hard key ceiling.
//!
//! # Features
//!
//! - Deterministic shard-ordered corpus streaming (plain or gzipped)
//! - Insert-only, idempotent relational fill with bulk existence checks
//! - Multi-pass bounded-memory index aggregation with resumable output
//! - Custom Cyrillic/Latin collation for human-facing ordering
//! - Best-effort recovery of truncated inline cover images

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Custom name collation.
pub mod collate;
/// Configuration and CLI.
pub mod config;
/// Metadata stream reader.
pub mod corpus;
/// Cover extraction.
pub mod covers;
/// Database operations.
pub mod db;
/// Corrupted cover payload recovery.
pub mod decode;
/// Error types.
pub mod error;
/// Incremental relational fill.
pub mod fill;
/// Genre and language reference catalogs.
pub mod genres;
/// Bounded-memory index aggregation.
pub mod index;
/// Sharded static output materialization.
pub mod pages;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
