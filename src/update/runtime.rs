use anyhow::{anyhow, Result};
use colored::Colorize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::RuntimeConfig;
use crate::error::UpdateError;
use crate::host::Host;

/// Four-part component version, ordered component by component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion(pub u32, pub u32, pub u32, pub u32);

impl RuntimeVersion {
    /// Parse `major.minor.build.revision`; missing trailing parts read as zero
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = [0u32; 4];
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("Empty runtime version"));
        }
        for (i, part) in trimmed.split('.').enumerate() {
            if i >= 4 {
                return Err(anyhow!("Too many components in runtime version '{}'", s));
            }
            parts[i] = part
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid runtime version '{}': {}", s, e))?;
        }
        Ok(Self(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0, self.1, self.2, self.3)
    }
}

/// A system runtime the application needs, as seen by this machine
pub trait RuntimeComponent {
    /// Version registered with the system, `None` when not installed
    fn installed_version(&self) -> Result<Option<RuntimeVersion>>;

    /// Version embedded in a downloaded installer
    fn bundled_version(&self, installer: &Path) -> Result<RuntimeVersion>;

    /// Run the installer unattended and return its exit code
    fn run_installer(&self, installer: &Path, args: &[String]) -> Result<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOutcome {
    UpToDate,
    AlreadyInstalled,
    Installed,
    RestartRequired,
}

/// Install the bundled runtime unless the registered one already matches it
pub fn ensure_runtime(
    host: &dyn Host,
    component: &dyn RuntimeComponent,
    config: &RuntimeConfig,
    scratch: &Path,
) -> Result<RuntimeOutcome> {
    let installer = installer_path(&config.redist_url, scratch);
    println!("{} Checking runtime dependencies...", "●".cyan());
    host.download(&config.redist_url, &installer)?;

    let installed = component.installed_version()?.unwrap_or_default();
    let bundled = component.bundled_version(&installer)?;
    log::info!("runtime installed: {}, bundled: {}", installed, bundled);

    if installed == bundled {
        println!("{} Runtime {} already installed", "✓".green(), installed);
        return Ok(RuntimeOutcome::UpToDate);
    }

    println!("{} Installing runtime {}...", "●".cyan(), bundled);
    let code = component.run_installer(&installer, &config.installer_args)?;
    let outcome = classify_exit(code, config)?;
    match outcome {
        RuntimeOutcome::RestartRequired => println!(
            "{} Runtime installed. A restart is recommended.",
            "!".yellow()
        ),
        _ => println!("{} Runtime ready", "✓".green()),
    }
    Ok(outcome)
}

fn classify_exit(code: i32, config: &RuntimeConfig) -> Result<RuntimeOutcome, UpdateError> {
    match code {
        0 => Ok(RuntimeOutcome::Installed),
        c if c == config.already_installed_code => Ok(RuntimeOutcome::AlreadyInstalled),
        c if c == config.restart_required_code => Ok(RuntimeOutcome::RestartRequired),
        c => Err(UpdateError::InstallerFailed { code: c }),
    }
}

fn installer_path(url: &str, scratch: &Path) -> PathBuf {
    let name = url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("runtime-installer.exe");
    scratch.join(name)
}

/// The runtime as registered with this operating system
#[derive(Debug, Default)]
pub struct SystemRuntime;

#[cfg(windows)]
impl RuntimeComponent for SystemRuntime {
    fn installed_version(&self) -> Result<Option<RuntimeVersion>> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        const KEY: &str = r"SOFTWARE\Microsoft\VisualStudio\14.0\VC\Runtimes\x64";

        let key = match RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(KEY) {
            Ok(key) => key,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let installed: u32 = key.get_value("Installed").unwrap_or(0);
        if installed == 0 {
            return Ok(None);
        }

        let part = |name: &str| -> Result<u32> { Ok(key.get_value::<u32, _>(name)?) };
        Ok(Some(RuntimeVersion(
            part("Major")?,
            part("Minor")?,
            part("Bld")?,
            part("Rbld")?,
        )))
    }

    fn bundled_version(&self, installer: &Path) -> Result<RuntimeVersion> {
        use anyhow::Context;
        use std::process::Command;

        let script = format!(
            "(Get-Item -LiteralPath '{}').VersionInfo.FileVersion",
            installer.display().to_string().replace('\'', "''")
        );
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output()
            .context("Failed to run powershell to read installer version")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Failed to read installer version: {}", stderr));
        }

        RuntimeVersion::parse(&String::from_utf8_lossy(&output.stdout))
    }

    fn run_installer(&self, installer: &Path, args: &[String]) -> Result<i32> {
        use anyhow::Context;
        use std::process::Command;

        let status = Command::new(installer)
            .args(args)
            .status()
            .with_context(|| format!("Failed to run {}", installer.display()))?;
        status
            .code()
            .ok_or_else(|| anyhow!("Runtime installer terminated without an exit code"))
    }
}

#[cfg(not(windows))]
impl RuntimeComponent for SystemRuntime {
    fn installed_version(&self) -> Result<Option<RuntimeVersion>> {
        Err(anyhow!("Runtime dependency checks are only supported on Windows"))
    }

    fn bundled_version(&self, _installer: &Path) -> Result<RuntimeVersion> {
        Err(anyhow!("Runtime dependency checks are only supported on Windows"))
    }

    fn run_installer(&self, _installer: &Path, _args: &[String]) -> Result<i32> {
        Err(anyhow!("Runtime dependency checks are only supported on Windows"))
    }
}
