pub mod download;
pub mod extract;
pub mod manifest;
pub mod migration;
pub mod release;
pub mod runtime;
pub mod version;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testutil;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::config::Config;
use crate::context::InstallContext;
use crate::error::UpdateError;
use crate::host::Host;

pub use extract::{Extraction, RetryPolicy};
pub use manifest::{Manifest, ManifestRules};
pub use release::ReleaseDescriptor;
pub use runtime::{RuntimeComponent, RuntimeOutcome, RuntimeVersion, SystemRuntime};
pub use version::CURRENT_VERSION;

/// Input to one update run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    pub is_full: bool,
    /// Set by the updater that already replaced itself and handed off
    pub skip_self_update: bool,
    pub should_launch: bool,
    pub iso_path: String,
    /// Version being upgraded from; empty when the install predates tracking
    pub previous_version: String,
}

impl UpdateRequest {
    /// Whether the application has to be gone before this run continues
    pub fn needs_wait(&self) -> bool {
        self.is_full || self.skip_self_update
    }

    /// Command line for the freshly extracted updater to finish this run
    pub fn handoff_args(&self) -> Vec<String> {
        let mut args = vec!["app-update".to_string(), "--skip-updater".to_string()];
        if self.is_full {
            args.push("--full".to_string());
        }
        if self.should_launch {
            args.push("--launch".to_string());
        }
        if !self.iso_path.is_empty() {
            args.push("--iso".to_string());
            args.push(self.iso_path.clone());
        }
        if !self.previous_version.is_empty() {
            args.push("--prev-version".to_string());
            args.push(self.previous_version.clone());
        }
        args
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new updater was started and owns the rest of the update
    HandedOff,
    Installed { version: String, launched: bool },
}

/// Sequences one update run against an installation
pub struct Orchestrator<'a> {
    ctx: &'a InstallContext,
    config: &'a Config,
    rules: ManifestRules,
    policy: RetryPolicy,
    host: &'a dyn Host,
    runtime: &'a dyn RuntimeComponent,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        ctx: &'a InstallContext,
        config: &'a Config,
        host: &'a dyn Host,
        runtime: &'a dyn RuntimeComponent,
    ) -> Result<Self> {
        Ok(Self {
            ctx,
            config,
            rules: ManifestRules::from_config(config)?,
            policy: RetryPolicy::from_config(&config.timing),
            host,
            runtime,
        })
    }

    /// Run with every failure, panics included, collapsed into `UpdateError::RunFailed`.
    ///
    /// The cause is printed and logged before it is dropped.
    pub fn run_guarded(&self, request: &UpdateRequest) -> Result<Outcome, UpdateError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run(request))) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                log::error!("update failed: {:#}", e);
                eprintln!("{} {:#}", "✗".red(), e);
                Err(UpdateError::RunFailed)
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("update panicked: {}", message);
                eprintln!("{} {}", "✗".red(), message);
                Err(UpdateError::RunFailed)
            }
        }
    }

    pub fn run(&self, request: &UpdateRequest) -> Result<Outcome> {
        log::info!("starting update run: {:?}", request);

        if request.needs_wait() {
            watcher::wait_for_exit(
                self.host,
                &self.ctx.app_executables,
                self.config.timing.poll_interval(),
                self.config.timing.max_wait(),
            )?;
        }

        let channels = release::candidate_channels(&request.previous_version, &self.config.release);
        println!("{} Checking for the latest release...", "●".cyan());
        let latest = self
            .host
            .latest_release(&self.config.release.endpoint, &channels)?;
        println!(
            "{} Latest release: {} ({})",
            "✓".green(),
            latest.version.green(),
            latest.channel
        );
        if let Ok(true) = version::is_newer(&request.previous_version, &latest.version) {
            log::warn!(
                "installed {} is newer than latest {}; reinstalling anyway",
                request.previous_version,
                latest.version
            );
        }

        let scratch = tempfile::Builder::new()
            .prefix("bundle-update")
            .tempdir()
            .context("Failed to create scratch directory")?;
        let archive = scratch.path().join("bundle.zip");
        println!("Downloading {}...", latest.version);
        self.host.download(&latest.download_url, &archive)?;

        if request.skip_self_update {
            self.install(request, &latest, &archive, scratch.path())
        } else {
            self.self_update(request, &archive)
        }
    }

    /// Replace the updater binary and hand the run to the new one
    fn self_update(&self, request: &UpdateRequest, archive: &Path) -> Result<Outcome> {
        println!("{} Preparing to update...", "●".cyan());

        if remove_if_present(&self.ctx.staged_updater)? {
            log::warn!(
                "removed {} left by an interrupted self-update",
                self.ctx.staged_updater.display()
            );
        }

        fs::rename(&self.ctx.updater, &self.ctx.staged_updater).with_context(|| {
            format!(
                "Failed to move {} out of the way",
                self.ctx.updater.display()
            )
        })?;

        let extracted = extract::extract_files(
            &self.ctx.dir,
            archive,
            &self.rules,
            Manifest::UpdaterOnly,
            &self.policy,
        )
        .and_then(|extraction| {
            if extraction.written.is_empty() {
                Err(anyhow!(
                    "Release archive does not contain {}",
                    self.ctx.updater_name
                ))
            } else {
                Ok(extraction)
            }
        });

        if let Err(e) = extracted {
            self.restore_updater();
            return Err(e);
        }

        self.host
            .spawn(&self.ctx.updater, &request.handoff_args())
            .context("Failed to start the new updater")?;
        println!("{} Handed off to the new updater", "✓".green());
        Ok(Outcome::HandedOff)
    }

    /// Put the running updater back under its own name after a failed replacement
    fn restore_updater(&self) {
        if self.ctx.updater.exists() {
            if let Err(e) = fs::remove_file(&self.ctx.updater) {
                log::error!("could not remove partial {}: {}", self.ctx.updater.display(), e);
                return;
            }
        }
        if let Err(e) = fs::rename(&self.ctx.staged_updater, &self.ctx.updater) {
            log::error!("could not restore {}: {}", self.ctx.updater.display(), e);
        }
    }

    fn install(
        &self,
        request: &UpdateRequest,
        latest: &ReleaseDescriptor,
        archive: &Path,
        scratch: &Path,
    ) -> Result<Outcome> {
        // The application has exited, so no earlier updater can still be running
        remove_if_present(&self.ctx.staged_updater)?;

        if version::is_untracked(&request.previous_version) {
            let removed = migration::remove_legacy_configs(
                &self.ctx.dir,
                &self.config.migration.config_dir,
            )?;
            if removed > 0 {
                println!("{} Removed {} legacy config file(s)", "✓".green(), removed);
            }
        }

        let mode = if request.is_full {
            Manifest::Full
        } else {
            Manifest::Partial
        };
        println!("{} Installing {} update...", "●".cyan(), mode.name());
        let data = extract::extract_files(&self.ctx.dir, archive, &self.rules, mode, &self.policy)?;
        log::info!("{} data file(s) written", data.written.len());

        let exe = extract::extract_files(
            &self.ctx.dir,
            archive,
            &self.rules,
            Manifest::ExecutableOnly,
            &self.policy,
        )?;

        if self.config.runtime.enabled {
            runtime::ensure_runtime(self.host, self.runtime, &self.config.runtime, scratch)?;
        }

        println!("{} Updated to {}", "✓".green(), latest.version.green());

        let launched = request.should_launch;
        if launched {
            let app = self.ctx.dir.join(&exe.app_executable);
            let mut args = Vec::new();
            if !request.iso_path.is_empty() {
                args.push("-e".to_string());
                args.push(request.iso_path.clone());
            }
            self.host
                .spawn(&app, &args)
                .context("Failed to start the application")?;
        }

        Ok(Outcome::Installed {
            version: latest.version.clone(),
            launched,
        })
    }
}

/// Remove a file, returning whether it existed
fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::testutil::{build_archive, sample_bundle, FakeHost, FakeRuntime};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        install: TempDir,
        _scratch: TempDir,
        ctx: InstallContext,
        config: Config,
        archive: std::path::PathBuf,
    }

    fn fixture(bundle: Vec<(String, &'static [u8])>) -> Fixture {
        let install = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let archive = build_archive(scratch.path(), &bundle);

        let mut config = Config::default();
        config.timing.poll_interval_ms = 1;
        config.timing.write_window_secs = 1;
        config.timing.write_backoff_ms = 10;
        config.runtime.enabled = false;

        let ctx = InstallContext::in_dir(install.path(), &config.product);
        fs::write(&ctx.updater, b"old-updater").unwrap();
        fs::write(install.path().join("Slippi Dolphin.exe"), b"old-app").unwrap();

        Fixture {
            install,
            _scratch: scratch,
            ctx,
            config,
            archive,
        }
    }

    fn read(fx: &Fixture, name: &str) -> Vec<u8> {
        fs::read(fx.install.path().join(name)).unwrap()
    }

    #[test]
    fn test_self_update_replaces_updater_and_hands_off() {
        let fx = fixture(sample_bundle(""));
        let host = FakeHost::new(0).with_archive(&fx.archive);
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let request = UpdateRequest {
            should_launch: true,
            iso_path: "C:/games/melee.iso".to_string(),
            previous_version: "2.3.0".to_string(),
            ..Default::default()
        };
        let outcome = orch.run(&request).unwrap();

        assert_eq!(outcome, Outcome::HandedOff);
        assert_eq!(fs::read(&fx.ctx.staged_updater).unwrap(), b"old-updater");
        assert_eq!(fs::read(&fx.ctx.updater).unwrap(), b"new-updater");
        // install path untouched
        assert_eq!(read(&fx, "Slippi Dolphin.exe"), b"old-app");
        assert!(!fx.install.path().join("Sys").exists());
        assert_eq!(host.polls(), 0);

        let spawns = host.spawns();
        assert_eq!(spawns.len(), 1);
        let (program, args, bytes) = &spawns[0];
        assert_eq!(program, &fx.ctx.updater);
        assert_eq!(bytes.as_deref(), Some(b"new-updater".as_slice()));
        assert_eq!(
            args,
            &vec![
                "app-update",
                "--skip-updater",
                "--launch",
                "--iso",
                "C:/games/melee.iso",
                "--prev-version",
                "2.3.0",
            ]
        );
    }

    #[test]
    fn test_full_self_update_waits_and_forwards_full() {
        let fx = fixture(sample_bundle(""));
        let host = FakeHost::new(2).with_archive(&fx.archive);
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let request = UpdateRequest {
            is_full: true,
            ..Default::default()
        };
        assert_eq!(orch.run(&request).unwrap(), Outcome::HandedOff);

        assert_eq!(host.polls(), 3);
        let spawns = host.spawns();
        assert!(spawns[0].1.contains(&"--full".to_string()));
        assert!(!spawns[0].1.contains(&"--launch".to_string()));
        assert!(!fx.install.path().join("Sys").exists());
    }

    #[test]
    fn test_failed_self_update_restores_updater() {
        let bundle: Vec<_> = sample_bundle("")
            .into_iter()
            .filter(|(name, _)| name != "dolphin-slippi-tools.exe")
            .collect();
        let fx = fixture(bundle);
        let host = FakeHost::new(0).with_archive(&fx.archive);
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        assert!(orch.run(&UpdateRequest::default()).is_err());
        assert_eq!(fs::read(&fx.ctx.updater).unwrap(), b"old-updater");
        assert!(!fx.ctx.staged_updater.exists());
        assert!(host.spawns().is_empty());
    }

    #[test]
    fn test_partial_install_after_handoff() {
        let fx = fixture(sample_bundle("FM/"));
        fs::write(&fx.ctx.staged_updater, b"stale").unwrap();
        let host = FakeHost::new(1)
            .with_archive(&fx.archive)
            .with_probe(&fx.ctx.staged_updater);
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let request = UpdateRequest {
            skip_self_update: true,
            should_launch: true,
            iso_path: "melee.iso".to_string(),
            previous_version: "2.3.0".to_string(),
            ..Default::default()
        };
        let outcome = orch.run(&request).unwrap();

        assert_eq!(
            outcome,
            Outcome::Installed {
                version: "2.4.0".to_string(),
                launched: true
            }
        );
        // staged updater still present while the application was being watched
        assert_eq!(host.probe_log(), vec![true, true]);
        assert!(!fx.ctx.staged_updater.exists());
        assert_eq!(fs::read(&fx.ctx.updater).unwrap(), b"old-updater");
        assert_eq!(read(&fx, "Slippi Dolphin.exe"), b"new-app");
        assert_eq!(read(&fx, "Sys/GameSettings/GALE01r2.ini"), b"ini-e");
        assert!(!fx.install.path().join("Sys/Resources/icon.png").exists());

        let spawns = host.spawns();
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].0, fx.install.path().join("Slippi Dolphin.exe"));
        assert_eq!(spawns[0].1, vec!["-e", "melee.iso"]);
    }

    #[test]
    fn test_full_install_without_launch() {
        let fx = fixture(sample_bundle(""));
        let host = FakeHost::new(0).with_archive(&fx.archive);
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let request = UpdateRequest {
            is_full: true,
            skip_self_update: true,
            previous_version: "2.3.0".to_string(),
            ..Default::default()
        };
        let outcome = orch.run(&request).unwrap();

        assert!(matches!(outcome, Outcome::Installed { launched: false, .. }));
        assert_eq!(read(&fx, "Sys/Resources/icon.png"), b"icon");
        assert_eq!(read(&fx, "Slippi Dolphin.exe"), b"new-app");
        assert_eq!(fs::read(&fx.ctx.updater).unwrap(), b"old-updater");
        assert!(host.spawns().is_empty());
    }

    #[test]
    fn test_untracked_install_runs_migration() {
        let fx = fixture(sample_bundle(""));
        let settings = fx.install.path().join("User/GameSettings");
        fs::create_dir_all(&settings).unwrap();
        fs::write(settings.join("GALE01.ini"), b"old").unwrap();

        let host = FakeHost::new(0).with_archive(&fx.archive);
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let tracked = UpdateRequest {
            skip_self_update: true,
            previous_version: "2.3.0".to_string(),
            ..Default::default()
        };
        orch.run(&tracked).unwrap();
        assert!(settings.join("GALE01.ini").exists());

        let untracked = UpdateRequest {
            skip_self_update: true,
            ..Default::default()
        };
        orch.run(&untracked).unwrap();
        assert!(!settings.join("GALE01.ini").exists());
    }

    #[test]
    fn test_runtime_reconciled_when_enabled() {
        let mut fx = fixture(sample_bundle(""));
        fx.config.runtime.enabled = true;
        let host = FakeHost::new(0).with_archive(&fx.archive);
        let runtime = FakeRuntime::new(None, RuntimeVersion(14, 38, 0, 0), 0);
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let request = UpdateRequest {
            skip_self_update: true,
            previous_version: "2.3.0".to_string(),
            ..Default::default()
        };
        orch.run(&request).unwrap();

        assert_eq!(runtime.installer_runs(), 1);
        assert_eq!(host.downloads().len(), 2);
    }

    #[test]
    fn test_beta_install_queries_beta_channel() {
        let fx = fixture(sample_bundle(""));
        let host = FakeHost::new(0).with_archive(&fx.archive);
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let request = UpdateRequest {
            skip_self_update: true,
            previous_version: "2.4.0-beta".to_string(),
            ..Default::default()
        };
        orch.run(&request).unwrap();
        assert_eq!(host.queried_channels(), vec![vec!["stable", "beta"]]);
    }

    #[test]
    fn test_guarded_run_collapses_errors() {
        let fx = fixture(sample_bundle(""));
        let host = FakeHost::new(0).failing_release();
        let runtime = FakeRuntime::default();
        let orch = Orchestrator::new(&fx.ctx, &fx.config, &host, &runtime).unwrap();

        let err = orch.run_guarded(&UpdateRequest::default()).unwrap_err();
        assert!(matches!(err, UpdateError::RunFailed));
        assert!(fx.ctx.updater.exists());
        assert!(!fx.ctx.staged_updater.exists());
    }

    #[test]
    fn test_handoff_args_minimal() {
        assert_eq!(
            UpdateRequest::default().handoff_args(),
            vec!["app-update", "--skip-updater"]
        );
    }
}
