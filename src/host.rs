use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::update::{download, release, ReleaseDescriptor};

/// Side effects an update run needs from the outside world
pub trait Host {
    /// Latest release among `channels` from the metadata service at `endpoint`
    fn latest_release(&self, endpoint: &str, channels: &[String]) -> Result<ReleaseDescriptor>;

    fn download(&self, url: &str, dest: &Path) -> Result<()>;

    /// Whether any running process has one of `names` as its executable name
    fn is_running(&self, names: &[String]) -> bool;

    /// Start `program` and return without waiting for it
    fn spawn(&self, program: &Path, args: &[String]) -> Result<()>;
}

/// The real network, process table and process launcher
#[derive(Debug, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    fn latest_release(&self, endpoint: &str, channels: &[String]) -> Result<ReleaseDescriptor> {
        release::fetch_latest_release(endpoint, channels)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        download::download_file(url, dest)
    }

    fn is_running(&self, names: &[String]) -> bool {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );

        system.processes().values().any(|process| {
            let exe_name = process
                .exe()
                .and_then(|exe| exe.file_name())
                .map(|name| name.to_string_lossy().into_owned());
            let name = process.name().to_string_lossy();
            names.iter().any(|wanted| {
                wanted.eq_ignore_ascii_case(&name)
                    || exe_name
                        .as_deref()
                        .is_some_and(|exe| wanted.eq_ignore_ascii_case(exe))
            })
        })
    }

    fn spawn(&self, program: &Path, args: &[String]) -> Result<()> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = program.parent() {
            cmd.current_dir(dir);
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", program.display()))?;
        log::info!("started {} (pid {})", program.display(), child.id());
        Ok(())
    }
}
