pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod logging;
pub mod update;
pub mod user;

pub use config::Config;
pub use context::InstallContext;
pub use error::UpdateError;
pub use update::{Orchestrator, Outcome, UpdateRequest};
