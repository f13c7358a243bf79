use anyhow::{anyhow, Result};
use semver::Version;

/// Version of this updater binary
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse a version string (with or without 'v' prefix)
pub fn parse_version(version_str: &str) -> Result<Version> {
    let cleaned = version_str.trim().trim_start_matches('v');
    Version::parse(cleaned).map_err(|e| anyhow!("Invalid version '{}': {}", version_str, e))
}

/// Compare versions, returns true if remote is newer than current
pub fn is_newer(remote: &str, current: &str) -> Result<bool> {
    let remote_ver = parse_version(remote)?;
    let current_ver = parse_version(current)?;
    Ok(remote_ver > current_ver)
}

/// Whether an installed version string belongs to the beta track.
///
/// Checks the semver pre-release tag when the string parses, and falls back
/// to a plain substring match for anything else.
pub fn is_beta(version: &str, marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    match parse_version(version) {
        Ok(v) => v.pre.as_str().contains(marker) || v.build.as_str().contains(marker),
        Err(_) => version.contains(marker),
    }
}

/// An empty previous version means the install predates version tracking
pub fn is_untracked(version: &str) -> bool {
    version.trim().is_empty()
}
