use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::ProductConfig;

/// Paths of one installation, resolved once per run from the updater's own location.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub dir: PathBuf,
    pub updater: PathBuf,
    pub staged_updater: PathBuf,
    /// Current name first, legacy second
    pub app_executables: Vec<String>,
    pub updater_name: String,
}

impl InstallContext {
    /// Directory of the running executable
    pub fn exe_dir() -> Result<PathBuf> {
        let exe = std::env::current_exe().context("Failed to get current executable path")?;
        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Executable has no parent directory: {}", exe.display()))
    }

    pub fn in_dir(dir: &Path, product: &ProductConfig) -> Self {
        Self {
            dir: dir.to_path_buf(),
            updater: dir.join(&product.updater),
            staged_updater: dir.join(&product.staged_updater),
            app_executables: product.app_executables(),
            updater_name: product.updater.clone(),
        }
    }
}
