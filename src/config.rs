use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "updater.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    /// Executable name of the application as currently shipped
    pub executable: String,

    /// Executable name before the product rename; still watched and recognized
    pub legacy_executable: String,

    pub updater: String,

    /// Name the running updater is moved to while its replacement is written
    pub staged_updater: String,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            executable: "Slippi Dolphin.exe".to_string(),
            legacy_executable: "Dolphin.exe".to_string(),
            updater: "dolphin-slippi-tools.exe".to_string(),
            staged_updater: "old-dolphin-slippi-tools.exe".to_string(),
        }
    }
}

impl ProductConfig {
    /// Current name first, then the legacy one
    pub fn app_executables(&self) -> Vec<String> {
        vec![self.executable.clone(), self.legacy_executable.clone()]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub endpoint: String,
    pub stable_channel: String,
    pub beta_channel: String,

    /// Substring of a version string that marks a beta install
    pub beta_marker: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://slippi-hasura.herokuapp.com/v1/graphql".to_string(),
            stable_channel: "stable".to_string(),
            beta_channel: "beta".to_string(),
            beta_marker: "beta".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartialConfig {
    /// Archive-relative files always refreshed by a partial update
    pub files: Vec<String>,

    /// Glob for the game-data directory; `*` does not cross `/`
    pub game_data: String,
}

impl Default for PartialConfig {
    fn default() -> Self {
        Self {
            files: vec![
                "Sys/GameSettings/GALE01r2.ini".to_string(),
                "Sys/GameSettings/GALJ01r2.ini".to_string(),
            ],
            game_data: "Sys/GameFiles/GALE01/*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Install-relative directory cleared when upgrading from an untracked version
    pub config_dir: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            config_dir: "User/GameSettings".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,

    /// Upper bound for the process watch; unset waits forever
    pub max_wait_secs: Option<u64>,

    pub write_window_secs: u64,
    pub write_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_wait_secs: None,
            write_window_secs: 20,
            write_backoff_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }

    pub fn write_window(&self) -> Duration {
        Duration::from_secs(self.write_window_secs)
    }

    pub fn write_backoff(&self) -> Duration {
        Duration::from_millis(self.write_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub redist_url: String,
    pub installer_args: Vec<String>,

    /// Exit code meaning a same or newer version is already present
    pub already_installed_code: i32,

    /// Exit code meaning success with a pending restart
    pub restart_required_code: i32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(windows),
            redist_url: "https://aka.ms/vs/17/release/vc_redist.x64.exe".to_string(),
            installer_args: vec![
                "/install".to_string(),
                "/quiet".to_string(),
                "/norestart".to_string(),
            ],
            already_installed_code: 1638,
            restart_required_code: 3010,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub product: ProductConfig,
    pub release: ReleaseConfig,
    pub partial: PartialConfig,
    pub migration: MigrationConfig,
    pub timing: TimingConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }
}
