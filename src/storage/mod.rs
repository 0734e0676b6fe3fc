use crate::error::{Result, ScrapeError};
use crate::models::{ProfileRecord, PROFILE_COLUMNS};
use std::path::Path;
use tracing::info;

// ── Record writer ─────────────────────────────────────────────────────────────

/// Write `records` to `path` as CSV, replacing any existing file.
/// The header row is written even when there are no records.
pub fn write_records(records: &[ProfileRecord], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ScrapeError::persistence(parent, e))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| ScrapeError::csv(path, e))?;

    writer
        .write_record(PROFILE_COLUMNS)
        .map_err(|e| ScrapeError::csv(path, e))?;

    for record in records {
        writer.serialize(record).map_err(|e| ScrapeError::csv(path, e))?;
    }

    writer.flush().map_err(|e| ScrapeError::persistence(path, e))?;
    info!("CSV saved to {:?} ({} rows)", path, records.len());
    Ok(records.len())
}
