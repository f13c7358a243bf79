use std::path::PathBuf;

use thiserror::Error;

/// Classified failures of an update run.
///
/// Most operations return `anyhow::Result` and attach context as they go;
/// these variants mark the outcomes callers and tests need to tell apart.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("no release found for channels: {channels}")]
    NoRelease { channels: String },

    #[error("archive does not contain any of: {names}")]
    RootNotFound { names: String },

    #[error("could not write {} within {window_secs}s", path.display())]
    WriteTimeout {
        path: PathBuf,
        window_secs: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime installer exited with code {code}")]
    InstallerFailed { code: i32 },

    #[error("application still running after {secs}s")]
    WatchTimeout { secs: u64 },

    #[error("update failed")]
    RunFailed,
}
