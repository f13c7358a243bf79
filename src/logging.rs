use anyhow::Result;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use std::path::Path;

/// Start file logging under `<dir>/logs`, echoing warnings to stderr.
/// Keep the returned handle alive for the whole process.
pub fn init_logging(dir: &Path, verbose: bool) -> Result<LoggerHandle> {
    let log_dir = dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let level = if verbose { "debug" } else { "info" };
    let handle = Logger::try_with_env_or_str(level)?
        .log_to_file(
            FileSpec::default()
                .directory(&log_dir)
                .basename("bundle-updater")
                .suffix("log"),
        )
        .rotate(
            Criterion::Size(2_000_000),
            Naming::Numbers,
            Cleanup::KeepLogFiles(5),
        )
        .duplicate_to_stderr(if verbose { Duplicate::Debug } else { Duplicate::Warn })
        .start()?;

    Ok(handle)
}
