//! CLI error handling with user-friendly messages.
//!
//! Every error that reaches `main` means the process could not start or
//! could not keep running, so all of them exit with status 1.

use std::fmt;
use std::process;

use locotrack::config::ConfigFileError;
use locotrack::ingest::IngestError;
use locotrack::instance::LockError;
use locotrack::tracker::TrackerError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file missing or invalid
    Config(ConfigFileError),
    /// Failed to install the termination handler
    SignalHandler(String),
    /// Failed to build the async runtime
    Runtime(std::io::Error),
    /// Tracker failed to start or run
    Tracker(TrackerError),
    /// Ingest service failed to start
    Ingest(IngestError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigFileError::NotFound(_)) => {
                eprintln!();
                eprintln!("Create the file or pass --config <PATH>.");
                eprintln!("See 'locotrack config path' for the default location.");
            }
            CliError::Tracker(TrackerError::Lock(LockError::Held { .. })) => {
                eprintln!();
                eprintln!("Stop the running tracker first, or start without --no-preempt");
                eprintln!("to replace it.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::SignalHandler(msg) => write!(f, "Failed to set signal handler: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Tracker(e) => write!(f, "Tracker error: {}", e),
            CliError::Ingest(e) => write!(f, "Ingest error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Tracker(e) => Some(e),
            CliError::Ingest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<TrackerError> for CliError {
    fn from(e: TrackerError) -> Self {
        CliError::Tracker(e)
    }
}

impl From<IngestError> for CliError {
    fn from(e: IngestError) -> Self {
        CliError::Ingest(e)
    }
}
