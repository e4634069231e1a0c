//! Cover image extraction onto the sharded cover tree.

use std::fs;
use std::path::Path;

use crate::corpus;
use crate::decode::decode_cover;
use crate::error::{AppError, Result};
use crate::pages::id_to_path;

/// Outcome of a cover extraction run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoverStats {
    /// Covers written.
    pub written: usize,
    /// Covers skipped because the file already exists.
    pub existing: usize,
    /// Payloads that could not be recovered.
    pub failed: usize,
}

/// Stream the corpus once and write every recoverable inline cover to
/// `<root>/<k1k2>/<k3k4>/<book_id>.jpg`.
///
/// Decode failures are logged with enough context to find the source
/// record and never abort the run. Files already on disk are left
/// alone, so an interrupted run can simply be restarted.
pub fn extract_covers(corpus_dir: &Path, covers_root: &Path) -> Result<CoverStats> {
    fs::create_dir_all(covers_root).map_err(|e| {
        AppError::Config(format!(
            "cannot create covers root {}: {}",
            covers_root.display(),
            e
        ))
    })?;

    let mut stats = CoverStats::default();

    corpus::for_each_record(corpus_dir, |shard, record| {
        let Some(cover) = &record.cover else {
            return Ok(());
        };

        let path = covers_root.join(format!("{}.jpg", id_to_path(&record.book_id)));
        if path.exists() {
            stats.existing += 1;
            return Ok(());
        }

        match decode_cover(&cover.data) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, bytes)?;
                stats.written += 1;
            }
            Err(e) => {
                tracing::warn!(
                    shard = %shard,
                    book_id = %record.book_id,
                    filename = %record.filename,
                    error = %e,
                    "skipping unrecoverable cover"
                );
                stats.failed += 1;
            }
        }
        Ok(())
    })?;

    tracing::info!(
        written = stats.written,
        existing = stats.existing,
        failed = stats.failed,
        "cover extraction complete"
    );
    Ok(stats)
}
