mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "livequery",
    version,
    about = "Watch PostgreSQL queries and stream their results as they change"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a live query and print every snapshot as a JSON line
    Watch {
        /// Path to watch YAML file
        file: PathBuf,
        /// Stop after this many snapshots, the initial one included
        #[arg(long)]
        max_updates: Option<u64>,
    },
    /// Register a live query, report what it depends on, then remove it
    Check {
        /// Path to watch YAML file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Watch { file, max_updates } => commands::watch::execute(&file, max_updates).await,
        Commands::Check { file } => commands::check::execute(&file).await,
    }
}
