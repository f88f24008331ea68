//! Configuration inspection commands.
//!
//! `config path` prints where the configuration is read from and
//! `config show` prints the effective settings after defaults are applied.
//! Keys are never printed.

use std::path::Path;

use clap::Subcommand;
use locotrack::config::{config_file_path, IngestSettings, LoggingSettings, TrackerSettings};

use crate::error::CliError;
use crate::runner::load_config;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration
    Show,
}

/// Run a config subcommand.
pub fn run(config_path: Option<&Path>, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(config_path),
        ConfigCommands::Show => run_show(config_path),
    }
}

fn run_path(config_path: Option<&Path>) -> Result<(), CliError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);
    println!("{}", path.display());
    Ok(())
}

fn run_show(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;

    match &config.tracker {
        Some(tracker) => print_tracker(tracker),
        None => println!("[tracker]\n  (not configured)"),
    }
    println!();
    match &config.ingest {
        Some(ingest) => print_ingest(ingest),
        None => println!("[ingest]\n  (not configured)"),
    }
    Ok(())
}

fn print_tracker(settings: &TrackerSettings) {
    println!("[tracker]");
    println!("  my_name              = {}", settings.my_name);
    println!("  remote_host          = {}", settings.remote_host);
    println!("  remote_port          = {}", settings.remote_port);
    println!("  remote_psk           = (set)");
    println!("  location_cmd         = {}", settings.location_cmd.join(" "));
    println!(
        "  location_cmd_timeout = {}s",
        settings.location_cmd_timeout.as_secs_f64()
    );
    match settings.time_to_live {
        Some(ttl) => println!("  time_to_live         = {}s", ttl.as_secs_f64()),
        None => println!("  time_to_live         = 0 (forever)"),
    }
    println!("  sample_period        = {}s", settings.sample_period.as_secs_f64());
    println!("  send_data_period     = {}s", settings.send_data_period.as_secs_f64());
    println!("  max_buffer           = {} bytes", settings.max_buffer);
    println!("  home_dir             = {}", settings.home_dir.display());
    print_logging(&settings.logging);
}

fn print_ingest(settings: &IngestSettings) {
    println!("[ingest]");
    println!("  psk                      = {} host(s)", settings.credentials.len());
    println!("  listen                   = {}", settings.listen_addr());
    println!("  max_recv_delay_sec       = {}", settings.max_recv_delay_sec);
    println!("  max_elapsed_location_sec = {}", settings.max_elapsed_location_sec);
    println!(
        "  pg_connect               = {}",
        if settings.pg_connect.is_some() {
            "(set)"
        } else {
            "(disabled)"
        }
    );
    println!("  home_dir                 = {}", settings.home_dir.display());
    print_logging(&settings.logging);
}

fn print_logging(logging: &LoggingSettings) {
    match &logging.log_to {
        Some(path) => println!("  log_to = {}", path.display()),
        None => println!("  log_to = (stdout only)"),
    }
    println!("  logging = {}", logging.level);
}
