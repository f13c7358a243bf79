use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Clear per-title configuration files left by installs that predate version tracking.
///
/// Only files are removed; the directory tree stays. A missing directory is a no-op.
pub fn remove_legacy_configs(install_dir: &Path, config_dir: &str) -> Result<usize> {
    let dir = install_dir.join(config_dir);
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(&dir) {
        let entry = entry.with_context(|| format!("Failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        fs::remove_file(entry.path())
            .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
        log::info!("removed legacy config {}", entry.path().display());
        removed += 1;
    }

    Ok(removed)
}
