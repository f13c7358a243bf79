use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::release::ReleaseDescriptor;
use super::runtime::{RuntimeComponent, RuntimeVersion};
use crate::host::Host;

/// Write a zip named `bundle.zip` in `dir` holding `entries`
pub fn build_archive<S, B>(dir: &Path, entries: &[(S, B)]) -> PathBuf
where
    S: AsRef<str>,
    B: AsRef<[u8]>,
{
    let path = dir.join("bundle.zip");
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    for (name, bytes) in entries {
        let name = name.as_ref();
        let mode = if name.ends_with(".exe") { 0o755 } else { 0o644 };
        let options = SimpleFileOptions::default().unix_permissions(mode);
        writer.start_file(name, options).unwrap();
        writer.write_all(bytes.as_ref()).unwrap();
    }
    writer.finish().unwrap();
    path
}

/// A release bundle rooted at `prefix`, with one stray file outside the root
pub fn sample_bundle(prefix: &str) -> Vec<(String, &'static [u8])> {
    let files: [(&str, &'static [u8]); 6] = [
        ("Slippi Dolphin.exe", b"new-app"),
        ("dolphin-slippi-tools.exe", b"new-updater"),
        ("Sys/GameFiles/GALE01/patch.bin", b"patch"),
        ("Sys/GameSettings/GALE01r2.ini", b"ini-e"),
        ("Sys/GameSettings/GALJ01r2.ini", b"ini-j"),
        ("Sys/Resources/icon.png", b"icon"),
    ];

    let mut entries: Vec<_> = files
        .iter()
        .map(|(name, bytes)| (format!("{}{}", prefix, name), *bytes))
        .collect();
    if !prefix.is_empty() {
        entries.push(("README.txt".to_string(), b"outside".as_slice()));
    }
    entries
}

/// Scripted stand-in for the network and process table
pub struct FakeHost {
    running_polls: usize,
    polls: Cell<usize>,
    release: ReleaseDescriptor,
    fail_release: bool,
    archive: Option<PathBuf>,
    probe: Option<PathBuf>,
    probe_log: RefCell<Vec<bool>>,
    downloads: RefCell<Vec<String>>,
    queried: RefCell<Vec<Vec<String>>>,
    spawns: RefCell<Vec<(PathBuf, Vec<String>, Option<Vec<u8>>)>>,
}

impl FakeHost {
    /// Report the application as running for the first `running_polls` polls
    pub fn new(running_polls: usize) -> Self {
        Self {
            running_polls,
            polls: Cell::new(0),
            release: ReleaseDescriptor {
                download_url: "https://example.com/bundle-2.4.0.zip".to_string(),
                version: "2.4.0".to_string(),
                released_at: "2021-04-01T10:00:00+00:00".to_string(),
                channel: "stable".to_string(),
            },
            fail_release: false,
            archive: None,
            probe: None,
            probe_log: RefCell::new(Vec::new()),
            downloads: RefCell::new(Vec::new()),
            queried: RefCell::new(Vec::new()),
            spawns: RefCell::new(Vec::new()),
        }
    }

    /// Serve `archive` for the release download
    pub fn with_archive(mut self, archive: &Path) -> Self {
        self.archive = Some(archive.to_path_buf());
        self
    }

    /// Record whether `path` exists at every poll
    pub fn with_probe(mut self, path: &Path) -> Self {
        self.probe = Some(path.to_path_buf());
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.get()
    }

    pub fn probe_log(&self) -> Vec<bool> {
        self.probe_log.borrow().clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.borrow().clone()
    }

    pub fn queried_channels(&self) -> Vec<Vec<String>> {
        self.queried.borrow().clone()
    }

    /// Program, arguments and the program's bytes at spawn time
    pub fn spawns(&self) -> Vec<(PathBuf, Vec<String>, Option<Vec<u8>>)> {
        self.spawns.borrow().clone()
    }
}

impl Host for FakeHost {
    fn latest_release(&self, _endpoint: &str, channels: &[String]) -> Result<ReleaseDescriptor> {
        self.queried.borrow_mut().push(channels.to_vec());
        if self.fail_release {
            return Err(anyhow!("metadata service unreachable"));
        }
        Ok(self.release.clone())
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.downloads.borrow_mut().push(url.to_string());
        match &self.archive {
            Some(archive) if url == self.release.download_url => {
                fs::copy(archive, dest)?;
            }
            _ => fs::write(dest, b"installer")?,
        }
        Ok(())
    }

    fn is_running(&self, _names: &[String]) -> bool {
        let poll = self.polls.get();
        self.polls.set(poll + 1);
        if let Some(probe) = &self.probe {
            self.probe_log.borrow_mut().push(probe.exists());
        }
        poll < self.running_polls
    }

    fn spawn(&self, program: &Path, args: &[String]) -> Result<()> {
        self.spawns
            .borrow_mut()
            .push((program.to_path_buf(), args.to_vec(), fs::read(program).ok()));
        Ok(())
    }
}

/// Runtime component with fixed versions that counts installer runs
#[derive(Default)]
pub struct FakeRuntime {
    installed: Option<RuntimeVersion>,
    bundled: RuntimeVersion,
    exit_code: i32,
    runs: Cell<usize>,
}

impl FakeRuntime {
    pub fn new(installed: Option<RuntimeVersion>, bundled: RuntimeVersion, exit_code: i32) -> Self {
        Self {
            installed,
            bundled,
            exit_code,
            runs: Cell::new(0),
        }
    }

    pub fn installer_runs(&self) -> usize {
        self.runs.get()
    }
}

impl RuntimeComponent for FakeRuntime {
    fn installed_version(&self) -> Result<Option<RuntimeVersion>> {
        Ok(self.installed)
    }

    fn bundled_version(&self, _installer: &Path) -> Result<RuntimeVersion> {
        Ok(self.bundled)
    }

    fn run_installer(&self, _installer: &Path, _args: &[String]) -> Result<i32> {
        self.runs.set(self.runs.get() + 1);
        Ok(self.exit_code)
    }
}
