use crate::errors::DriverError;
use std::fs;
use std::path::{Path, PathBuf};

const LOG_EXTENSIONS: [&str; 2] = ["log", "jsonl"];

/// Deletes the oldest log files in `dir` until they fit in `budget_bytes`.
/// Only `.log` and `.jsonl` files count; nothing in `keep` is deleted.
pub fn enforce_total_budget(
    dir: &Path,
    budget_bytes: u64,
    keep: &[PathBuf],
) -> Result<Vec<PathBuf>, DriverError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| DriverError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_log_file(path))
        .collect::<Vec<_>>();

    files.sort_by(|a, b| {
        let ma = fs::metadata(a).ok().and_then(|m| m.modified().ok());
        let mb = fs::metadata(b).ok().and_then(|m| m.modified().ok());
        ma.cmp(&mb)
    });

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        if keep.contains(&path) {
            continue;
        }
        let len = fs::metadata(&path)
            .map_err(|e| DriverError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| DriverError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn is_log_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| LOG_EXTENSIONS.contains(&ext))
}
