//! File helpers shared by capture and export

use std::io;
use std::path::{Path, PathBuf};

/// Build `dir/stem.extension`, removing any file already at that path.
pub fn fresh_file_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let path = dir.join(format!("{}.{}", stem, extension));
    if path.exists() {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed stale file {:?}", path),
            Err(e) => tracing::warn!("File exists but could not be removed {:?}: {}", path, e),
        }
    }
    path
}

/// Timestamp-derived file stem, e.g. `Scopecast_1718000000000`
pub fn timestamped_stem(prefix: &str) -> String {
    format!("{}_{}", prefix, chrono::Utc::now().timestamp_millis())
}

/// Delete a file, treating "already gone" as success.
pub fn remove_file_quietly(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
            Err(e)
        }
    }
}
