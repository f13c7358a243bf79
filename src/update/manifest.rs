use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

use crate::config::Config;

/// Which archive entries an extraction pass writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manifest {
    /// Everything except the application executable and the updater
    Full,
    /// Allow-listed config files plus the game-data directory.
    ///
    /// Best effort: files deleted or renamed between versions are not tracked.
    Partial,
    UpdaterOnly,
    ExecutableOnly,
}

impl Manifest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::UpdaterOnly => "updater",
            Self::ExecutableOnly => "executable",
        }
    }
}

/// Names and patterns the manifests classify against, compiled once per run
#[derive(Debug, Clone)]
pub struct ManifestRules {
    app_executables: Vec<String>,
    updater: String,
    partial_files: Vec<String>,
    game_data: GlobMatcher,
}

impl ManifestRules {
    pub fn new(
        app_executables: Vec<String>,
        updater: String,
        partial_files: Vec<String>,
        game_data: &str,
    ) -> Result<Self> {
        let game_data = GlobBuilder::new(game_data)
            .literal_separator(true)
            .build()
            .with_context(|| format!("Invalid game-data glob: {}", game_data))?
            .compile_matcher();

        Ok(Self {
            app_executables,
            updater,
            partial_files,
            game_data,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.product.app_executables(),
            config.product.updater.clone(),
            config.partial.files.clone(),
            &config.partial.game_data,
        )
    }

    pub fn app_executables(&self) -> &[String] {
        &self.app_executables
    }

    /// Output path for a root-relative, `/`-separated archive path, or `None` to skip it
    pub fn select(&self, manifest: Manifest, path: &str) -> Option<String> {
        let admit = match manifest {
            Manifest::Full => !self.is_app_executable(path) && path != self.updater,
            Manifest::Partial => {
                self.partial_files.iter().any(|f| f == path) || self.game_data.is_match(path)
            }
            Manifest::UpdaterOnly => path == self.updater,
            Manifest::ExecutableOnly => self.is_app_executable(path),
        };
        admit.then(|| path.to_string())
    }

    fn is_app_executable(&self, path: &str) -> bool {
        self.app_executables.iter().any(|name| name == path)
    }
}
