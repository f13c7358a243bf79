use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::manifest::{Manifest, ManifestRules};
use crate::error::UpdateError;

/// How long a single target file may stay unwritable before extraction fails
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub window: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(timing: &crate::config::TimingConfig) -> Self {
        Self {
            window: timing.write_window(),
            backoff: timing.write_backoff(),
        }
    }
}

/// Result of one extraction pass
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Archive directory holding the application executable, `/`-terminated or empty
    pub root: String,
    /// Base name of the executable the root was located by
    pub app_executable: String,
    pub written: Vec<PathBuf>,
}

struct Entry {
    index: usize,
    path: String,
    is_dir: bool,
}

/// Materialize the entries `manifest` admits from `archive_path` under `target`.
///
/// Entries are addressed relative to the directory containing the application
/// executable. A target file that stays unwritable for the whole retry window
/// aborts the pass; files written before that point are left in place.
pub fn extract_files(
    target: &Path,
    archive_path: &Path,
    rules: &ManifestRules,
    manifest: Manifest,
    policy: &RetryPolicy,
) -> Result<Extraction> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("Failed to read zip archive")?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        match normalize_entry_name(entry.name()) {
            Some(path) => entries.push(Entry {
                index,
                path,
                is_dir: entry.is_dir(),
            }),
            None => log::warn!("skipping unsafe archive entry: {}", entry.name()),
        }
    }

    let (root, app_executable) = find_root(&entries, rules.app_executables())?;
    log::info!(
        "extracting {} pass from {} (root '{}')",
        manifest.name(),
        archive_path.display(),
        root
    );

    let mut written = Vec::new();
    for entry in &entries {
        let Some(relative) = entry.path.strip_prefix(root.as_str()) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        let Some(output) = rules.select(manifest, relative) else {
            continue;
        };
        let path = target.join(&output);

        if entry.is_dir {
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut zipped = archive.by_index(entry.index)?;
        let mut bytes = Vec::with_capacity(zipped.size() as usize);
        zipped
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read {} from archive", entry.path))?;
        let mode = zipped.unix_mode();
        drop(zipped);

        write_with_retry(&path, policy, || write_entry(&path, &bytes, mode))?;
        log::info!("finished copying file: {}", path.display());
        written.push(path);
    }

    Ok(Extraction {
        root,
        app_executable,
        written,
    })
}

/// Run `attempt` until it succeeds or `policy.window` has elapsed.
///
/// The error reported on timeout is the last one seen for this path.
pub fn write_with_retry<F>(path: &Path, policy: &RetryPolicy, mut attempt: F) -> Result<(), UpdateError>
where
    F: FnMut() -> io::Result<()>,
{
    let start = Instant::now();
    loop {
        match attempt() {
            Ok(()) => return Ok(()),
            Err(e) if start.elapsed() >= policy.window => {
                log::error!("giving up on {}: {}", path.display(), e);
                return Err(UpdateError::WriteTimeout {
                    path: path.to_path_buf(),
                    window_secs: policy.window.as_secs(),
                    source: e,
                });
            }
            Err(e) => {
                log::warn!("failed to write {}, will try again: {}", path.display(), e);
                thread::sleep(policy.backoff);
            }
        }
    }
}

fn write_entry(path: &Path, bytes: &[u8], mode: Option<u32>) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Locate the directory holding the application executable
fn find_root(entries: &[Entry], app_executables: &[String]) -> Result<(String, String)> {
    for entry in entries.iter().filter(|e| !e.is_dir) {
        let (dir, base) = match entry.path.rsplit_once('/') {
            Some((dir, base)) => (format!("{}/", dir), base),
            None => (String::new(), entry.path.as_str()),
        };
        if app_executables.iter().any(|name| name == base) {
            return Ok((dir, base.to_string()));
        }
    }

    Err(UpdateError::RootNotFound {
        names: app_executables.join(", "),
    }
    .into())
}

/// `/`-separated relative form of an entry name, or `None` if it would escape the target
fn normalize_entry_name(name: &str) -> Option<String> {
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') {
        return None;
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            p if p.contains(':') => return None,
            p => parts.push(p),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
