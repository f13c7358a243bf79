use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use bundle_updater::host::SystemHost;
use bundle_updater::update::{SystemRuntime, CURRENT_VERSION};
use bundle_updater::{logging, Config, InstallContext, Orchestrator, Outcome, UpdateRequest};

#[derive(Parser, Debug)]
#[command(name = "bundle-updater", version)]
#[command(about = "Installs, updates and launches the game bundle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to updater.toml next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to the console
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the latest release and update the installation
    AppUpdate(AppUpdateArgs),

    /// Refresh the local user profile from the server
    UserUpdate,
}

#[derive(Args, Debug)]
struct AppUpdateArgs {
    /// Replace every bundled file instead of just a few
    #[arg(long)]
    full: bool,

    /// The updater has already replaced itself; go straight to installing
    #[arg(long = "skip-updater")]
    skip_updater: bool,

    /// Launch the application once the update is done
    #[arg(long)]
    launch: bool,

    /// ISO to launch with
    #[arg(long, default_value = "")]
    iso: String,

    /// Version being upgraded from
    #[arg(long = "prev-version", default_value = "")]
    prev_version: String,
}

impl From<AppUpdateArgs> for UpdateRequest {
    fn from(args: AppUpdateArgs) -> Self {
        Self {
            is_full: args.full,
            skip_self_update: args.skip_updater,
            should_launch: args.launch,
            iso_path: args.iso,
            previous_version: args.prev_version,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Without its own location the updater cannot know what to update
    let exe_dir = InstallContext::exe_dir()?;

    let _logger = match logging::init_logging(&exe_dir, cli.verbose) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("{} Logging disabled: {}", "!".yellow(), e);
            None
        }
    };

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| Config::config_path(&exe_dir));
    let config = Config::load(&config_path)?;
    log::info!("bundle-updater {} in {}", CURRENT_VERSION, exe_dir.display());

    match cli.command {
        Command::AppUpdate(args) => {
            let ctx = InstallContext::in_dir(&exe_dir, &config.product);
            run_app_update(&ctx, &config, args.into())
        }
        Command::UserUpdate => {
            bundle_updater::user::run_user_update(&exe_dir, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_app_update(ctx: &InstallContext, config: &Config, request: UpdateRequest) -> Result<ExitCode> {
    let host = SystemHost;
    let runtime = SystemRuntime;
    let orchestrator = Orchestrator::new(ctx, config, &host, &runtime)?;

    match orchestrator.run_guarded(&request) {
        Ok(Outcome::HandedOff) => Ok(ExitCode::SUCCESS),
        Ok(Outcome::Installed { version, launched }) => {
            log::info!("installed {} (launched: {})", version, launched);
            Ok(ExitCode::SUCCESS)
        }
        Err(_) => {
            println!();
            println!(
                "{}",
                "Something went wrong. Read the messages above for more detail. \
                 If the game does not start, take a screenshot of this window and ask for help."
                    .red()
            );
            hold_window();
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Keep a double-clicked console open so the output stays readable
fn hold_window() {
    print!("Press enter to exit...");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}
