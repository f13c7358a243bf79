use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;

const USER_FILE: &str = "user.json";
const TIMEOUT: Duration = Duration::from_secs(15);

const USER_QUERY: &str = r#"
query ($channel: String!, $uid: String!) {
  dolphinVersions(order_by: {releasedAt: desc}, limit: 1, where: {type: {_eq: $channel}}) {
    version
  }
  user(uid: $uid) {
    uid
    connectCode
  }
}
"#;

/// Local player profile; fields this tool does not manage are carried through untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFile {
    pub uid: String,
    #[serde(default)]
    pub play_key: String,
    #[serde(default)]
    pub connect_code: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub latest_version: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    #[serde(rename = "connectCode")]
    connect_code: String,
}

#[derive(Debug, Deserialize)]
struct RemoteVersion {
    version: String,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: Option<RemoteUser>,
    #[serde(rename = "dolphinVersions")]
    versions: Vec<RemoteVersion>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: Option<UserData>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// Directory holding `user.json` for an install at `install_dir`
pub fn profile_dir(install_dir: &Path) -> Result<PathBuf> {
    if cfg!(target_os = "macos") {
        bail!("macOS is not supported; cannot locate {}", USER_FILE);
    }
    if cfg!(windows) {
        return Ok(install_dir.to_path_buf());
    }
    let base = dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(base.join("SlippiOnline").join("Sys"))
}

pub fn read_user_file(dir: &Path) -> Result<UserFile> {
    let path = dir.join(USER_FILE);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Could not open {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn write_user_file(dir: &Path, file: &UserFile) -> Result<()> {
    let path = dir.join(USER_FILE);
    let contents = serde_json::to_string(file).context("Failed to serialize user file")?;
    fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// Refresh the local profile from the metadata service
pub fn run_user_update(install_dir: &Path, config: &Config) -> Result<()> {
    let dir = profile_dir(install_dir)?;
    let mut file = read_user_file(&dir)?;

    println!("{} Syncing user profile...", "●".cyan());
    let data = fetch_user_data(&config.release.endpoint, &file.uid, &config.release.stable_channel)?;
    apply_remote(&mut file, data)?;
    write_user_file(&dir, &file)?;

    println!(
        "{} Profile updated ({}, latest {})",
        "✓".green(),
        file.connect_code,
        file.latest_version
    );
    Ok(())
}

fn apply_remote(file: &mut UserFile, data: UserData) -> Result<()> {
    let user = data
        .user
        .ok_or_else(|| anyhow!("No remote user found for uid {}", file.uid))?;
    let latest = data
        .versions
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No release found"))?;

    file.connect_code = user.connect_code;
    file.latest_version = latest.version;
    Ok(())
}

fn fetch_user_data(endpoint: &str, uid: &str, channel: &str) -> Result<UserData> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("bundle-updater/", env!("CARGO_PKG_VERSION")))
        .timeout(TIMEOUT)
        .build()?;

    let envelope: UserEnvelope = client
        .post(endpoint)
        .json(&json!({
            "query": USER_QUERY,
            "variables": { "channel": channel, "uid": uid },
        }))
        .send()
        .context("Failed to fetch user info from metadata service")?
        .error_for_status()?
        .json()
        .context("Failed to parse user info response")?;

    if !envelope.errors.is_empty() {
        return Err(anyhow!("Metadata service returned errors: {:?}", envelope.errors));
    }
    envelope.data.ok_or_else(|| anyhow!("Empty user info response"))
}
