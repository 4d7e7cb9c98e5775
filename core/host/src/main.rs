//! deskshell-host: desktop host for the dashboard.
//!
//! Launches the Python backend, exposes the privileged bridge to the UI over a
//! Unix socket, fronts every UI request with the offline cache engine and
//! opens the window.
//!
//! ## Subcommands
//!
//! - `run` (default): start the host
//! - `purge-cache`: delete every offline cache store

mod logging;
mod proxy;
mod run;

#[cfg(unix)]
mod bridge_server;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use deskshell_core::StorageConfig;
use offline_cache::StoreRegistry;

#[derive(Parser)]
#[command(name = "deskshell-host")]
#[command(about = "Desktop host for the deskshell dashboard")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.deskshell)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host (default)
    Run(RunArgs),

    /// Delete every offline cache store
    PurgeCache,
}

#[derive(Args, Default)]
pub struct RunArgs {
    /// Run the backend from the current directory instead of the bundled resources
    #[arg(long)]
    pub dev: bool,

    /// Bundled resources directory (packaged mode)
    #[arg(long, value_name = "DIR")]
    pub resources_dir: Option<PathBuf>,

    /// Interpreter used to run the backend
    #[arg(long, value_name = "COMMAND")]
    pub python: Option<String>,

    /// Backend entry script
    #[arg(long, value_name = "PATH")]
    pub script: Option<PathBuf>,

    /// Don't open a window; the host runs until quit over the bridge
    #[arg(long)]
    pub no_window: bool,
}

fn main() {
    let cli = Cli::parse();

    let storage = match &cli.data_dir {
        Some(dir) => StorageConfig::with_root(dir.clone()),
        None => match StorageConfig::from_home() {
            Ok(storage) => storage,
            Err(err) => {
                let _guard = logging::init(None);
                tracing::error!(error = %err, "Failed to resolve data directory");
                std::process::exit(1);
            }
        },
    };

    let _logging_guard = logging::init(Some(&storage.logs_dir()));

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            if let Err(err) = run::run(storage, args) {
                tracing::error!(error = %err, "deskshell-host failed");
                std::process::exit(1);
            }
        }
        Commands::PurgeCache => {
            let registry = StoreRegistry::new(storage.caches_dir());
            match registry.delete_all() {
                Ok(deleted) => println!("Deleted {} cache store(s)", deleted),
                Err(err) => {
                    tracing::error!(error = %err, "Failed to purge offline cache");
                    std::process::exit(1);
                }
            }
        }
    }
}
