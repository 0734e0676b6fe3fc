//! CSV loader for profile files written by the scrape step.

use crate::error::{Result, ScrapeError};
use crate::models::ProfileRecord;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read a profiles CSV back into records. Empty fields become `None`.
/// Rows that fail to parse are logged and skipped.
pub fn load_profiles(path: &Path) -> Result<Vec<ProfileRecord>> {
    debug!("Loading profiles from {:?}", path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| ScrapeError::csv(path, e))?;

    let mut records = Vec::new();
    for (i, result) in reader.deserialize::<ProfileRecord>().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => warn!("Row {} in {:?}: {}", i + 1, path, e),
        }
    }

    Ok(records)
}

/// Profile CSVs directly under `dir`, sorted by name. A missing directory is empty.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| ScrapeError::persistence(dir, e))? {
        let path = entry.map_err(|e| ScrapeError::persistence(dir, e))?.path();
        if path.is_file() && path.extension().map(|e| e == "csv").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
