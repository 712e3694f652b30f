//! Lumen command-line launcher

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lumen_logging::{init_logging, LogConfig};

mod cli;

use cli::CliContext;

#[derive(Parser, Debug)]
#[command(name = "lumen", version, about = "Media classification pipeline")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Configuration file (default: $LUMEN_HOME/lumen.toml)
    #[arg(long, global = true, env = "LUMEN_CONFIG")]
    config: Option<PathBuf>,

    /// State file (default: $LUMEN_HOME/state.json)
    #[arg(long, global = true, env = "LUMEN_STATE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a directory as a storage and queue its eligible files
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Owner of the storage
        #[arg(short, long, env = "LUMEN_USER", default_value = "local")]
        user: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run queued files through their models
    Classify {
        /// Model to run (repeatable; default: every enabled model)
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// Keep running batches until the queues stop shrinking
        #[arg(long)]
        drain: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Group face detections into clusters
    Cluster {
        /// Only cluster this user's detections
        #[arg(short, long)]
        user: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show queue depths and result counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deliver a file-system change to the consistency maintainer
    Event {
        /// What happened
        #[arg(value_enum)]
        kind: cli::event::EventKind,

        /// Affected path (the source of a move)
        path: PathBuf,

        /// Destination of a move
        #[arg(long)]
        to: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn command_wants_json(command: &Commands) -> bool {
    match command {
        Commands::Scan { json, .. } => *json,
        Commands::Classify { json, .. } => *json,
        Commands::Cluster { json, .. } => *json,
        Commands::Status { json } => *json,
        Commands::Config { json } => *json,
        Commands::Event { .. } => false,
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let (config, config_path) = cli::config::load(cli.config.as_deref())?;
    let state_path = match cli.state {
        Some(path) => path,
        None => cli::config::default_state_path()?,
    };
    let ctx = CliContext {
        config,
        config_path,
        state_path,
    };

    match cli.command {
        Commands::Scan { path, user, json } => {
            cli::scan::run(cli::scan::ScanArgs { path, user, json }, &ctx)
        }
        Commands::Classify {
            models,
            drain,
            json,
        } => cli::classify::run(
            cli::classify::ClassifyArgs {
                models,
                drain,
                json,
            },
            &ctx,
        ),
        Commands::Cluster { user, json } => {
            cli::cluster::run(cli::cluster::ClusterArgs { user, json }, &ctx)
        }
        Commands::Status { json } => cli::status::run(cli::status::StatusArgs { json }, &ctx),
        Commands::Event { kind, path, to } => {
            cli::event::run(cli::event::EventArgs { kind, path, to }, &ctx)
        }
        Commands::Config { json } => cli::config::run(cli::config::ConfigArgs { json }, &ctx),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let json_mode = command_wants_json(&cli.command);
    if let Err(err) = init_logging(LogConfig {
        app_name: "lumen",
        verbose: cli.verbose,
        quiet: json_mode,
        log_dir: None,
    }) {
        eprintln!("Warning: logging disabled: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                let payload = serde_json::json!({ "error": format!("{:#}", err) });
                println!("{}", payload);
            } else if let Some(helpful) = err.downcast_ref::<cli::error::HelpfulError>() {
                eprint!("{}", helpful);
            } else {
                eprintln!("ERROR: {:#}", err);
            }
            ExitCode::from(1)
        }
    }
}
