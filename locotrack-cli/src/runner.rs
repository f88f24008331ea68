//! CLI runner for common setup.
//!
//! Encapsulates config loading, logging initialization, the panic hook and
//! the termination flag so the command handlers stay short.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use locotrack::config::{ConfigFile, LoggingSettings};
use locotrack::logging::{init_logging, LoggingGuard};
use tokio::runtime::Runtime;
use tracing::info;

use crate::error::CliError;

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// Runner that keeps logging alive for a long-running command.
pub struct CliRunner {
    /// Logging guard - keeps the log file writer alive while the runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
}

impl CliRunner {
    /// Initialize logging and the panic hook.
    pub fn new(logging: &LoggingSettings) -> Result<Self, CliError> {
        locotrack::panic::init();

        let logging_guard = init_logging(logging.log_to.as_deref(), &logging.level)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self { logging_guard })
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("locotrack v{}", locotrack::VERSION);
        info!("locotrack CLI: {} command", command);
    }

    /// Flag set by SIGINT/SIGTERM.
    pub fn shutdown_flag(&self) -> Result<Arc<AtomicBool>, CliError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        ctrlc::set_handler(move || {
            shutdown_clone.store(true, Ordering::SeqCst);
        })
        .map_err(|e| CliError::SignalHandler(e.to_string()))?;

        Ok(shutdown)
    }

    /// Single-threaded runtime driving the tracker or the ingest loop.
    pub fn runtime(&self) -> Result<Runtime, CliError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)
    }
}
