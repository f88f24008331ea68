//! locotrack CLI - Command-line interface
//!
//! Runs either end of the tracking pipeline:
//!
//! - `locotrack track` samples the location and sends it to the server
//! - `locotrack ingest` receives, filters and stores the samples

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::track::TrackArgs;

#[derive(Parser)]
#[command(name = "locotrack")]
#[command(version = locotrack::VERSION)]
#[command(about = "Periodic location tracking over UDP", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.locotrack/config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the location periodically and send it to the ingest server
    Track(TrackArgs),

    /// Receive samples and store them as GPX tracks and database rows
    Ingest,

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Track(args) => commands::track::run(config_path, args),
        Commands::Ingest => commands::ingest::run(config_path),
        Commands::Config(command) => commands::config::run(config_path, command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
