//! Logging setup for both roles.
//!
//! - Always prints to stdout.
//! - With `log_to` set, also appends to that file through a non-blocking
//!   writer. The file is not truncated between runs.
//! - The level comes from `RUST_LOG` when set, otherwise from the `logging`
//!   configuration key.
//!
//! Every line carries a UTC timestamp.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Levels accepted by the `logging` configuration key.
pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize logging.
///
/// # Arguments
///
/// * `log_to` - Optional log file, appended to
/// * `level` - Default filter when `RUST_LOG` is not set
///
/// # Errors
///
/// Returns an error if the log file's directory cannot be created or a
/// global subscriber is already installed.
pub fn init_logging(log_to: Option<&Path>, level: &str) -> Result<LoggingGuard, io::Error> {
    let env_filter = build_filter(level);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false);

    let (file_layer, file_guard) = match log_to {
        Some(path) => {
            let (dir, file_name) = split_log_path(path)?;
            fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Filter from `RUST_LOG`, falling back to `level`.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr), io::Error> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("log_to is not a file path: {}", path.display()),
        )
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((dir, file_name))
}
