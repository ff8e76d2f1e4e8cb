use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod agent;
mod commands;
mod config;
mod sandbox;
mod search;
mod templates;
mod tools;

use config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "codeagent")]
#[command(
    author,
    version,
    about = "Generate Python code, run it in a per-user Docker sandbox, and repair it until it works"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./codeagent.toml)
    #[arg(short, long, global = true, env = "CODEAGENT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write codeagent.toml and .env.example in the current directory
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Manage a user's sandbox
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },

    /// Install packages into a user's sandbox
    Install {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Package names, installed one at a time
        #[arg(required = true)]
        packages: Vec<String>,

        /// Per-package time limit in seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },

    /// Copy a local program into a user's sandbox and run it
    Exec {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Program to run
        file: PathBuf,

        /// Name inside the workspace (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Maximum run time in seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },

    /// Query the knowledge-search service
    Search {
        /// Free-text query
        query: String,
    },

    /// Ask the agent to write, run and fix a program
    Ask {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// What the program should do
        request: String,

        /// Remove the sandbox when done
        #[arg(long)]
        remove_after: bool,
    },

    /// Print the tool schema offered to the model
    Tools,
}

#[derive(Subcommand)]
enum SandboxAction {
    /// Create the sandbox (no-op if it already exists)
    Up {
        #[arg(short, long)]
        user: String,
    },
    /// Force-remove the sandbox
    Down {
        #[arg(short, long)]
        user: String,
    },
    /// Show whether the sandbox is running
    Status {
        #[arg(short, long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd, cli.config.as_deref())?;

    let _log_guard = init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Init { force } => {
            commands::init::run(force)?;
        }
        Commands::Sandbox { action } => match action {
            SandboxAction::Up { user } => commands::sandbox::up(&config, &user).await?,
            SandboxAction::Down { user } => commands::sandbox::down(&config, &user).await?,
            SandboxAction::Status { user } => commands::sandbox::status(&config, &user).await?,
        },
        Commands::Install {
            user,
            packages,
            timeout,
        } => {
            commands::install::run(&config, &user, &packages, timeout).await?;
        }
        Commands::Exec {
            user,
            file,
            name,
            timeout,
        } => {
            commands::exec::run(&config, &user, &file, name.as_deref(), timeout).await?;
        }
        Commands::Search { query } => {
            commands::search::run(&config, &query).await?;
        }
        Commands::Ask {
            user,
            request,
            remove_after,
        } => {
            commands::ask::run(&config, &user, &request, remove_after).await?;
        }
        Commands::Tools => {
            commands::tools::run()?;
        }
    }

    Ok(())
}

/// Stderr logging plus, when enabled, JSON lines in the configured log file.
///
/// `RUST_LOG` overrides the default filter.
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let default = if verbose {
        "codeagent=debug"
    } else {
        "codeagent=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let (file_layer, guard) = if logging.enabled
        && std::fs::create_dir_all(&logging.directory).is_ok()
    {
        let appender = tracing_appender::rolling::never(&logging.directory, &logging.file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().json().with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}
