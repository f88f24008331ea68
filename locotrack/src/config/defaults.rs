//! Default values and constants for all configuration settings.

use std::ffi::CStr;
use std::path::PathBuf;

use super::file::config_directory;

/// UDP port shared by tracker and ingest service.
pub const DEFAULT_PORT: u16 = 33897;

/// Positioning command, split on whitespace.
pub const DEFAULT_LOCATION_CMD: &str = "termux-location -p network -r last";

pub const DEFAULT_LOCATION_CMD_TIMEOUT_SECS: u64 = 20;

/// Zero means run until stopped.
pub const DEFAULT_TIME_TO_LIVE_SECS: u64 = 0;

pub const DEFAULT_SAMPLE_PERIOD_SECS: u64 = 5;

pub const DEFAULT_SEND_DATA_PERIOD_SECS: u64 = 30;

/// Compressed batch ceiling (bytes). Kept below the datagram limit.
pub const DEFAULT_MAX_BUFFER: usize = 60_000;

pub const DEFAULT_LOCAL_ADDRESS: &str = "0.0.0.0";

/// Six hours.
pub const DEFAULT_MAX_RECV_DELAY_SECS: i64 = 21_600;

pub const DEFAULT_MAX_ELAPSED_LOCATION_SECS: f64 = 300.0;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default positioning command as an argument vector.
pub fn default_location_cmd() -> Vec<String> {
    DEFAULT_LOCATION_CMD
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Default home directory (~/.locotrack).
pub fn default_home_dir() -> PathBuf {
    config_directory()
}

/// This machine's host name, or `localhost` when it cannot be read.
pub fn system_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for its full length and the last byte is
    // left as a terminator.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len() - 1) };
    if rc != 0 {
        return "localhost".to_string();
    }
    CStr::from_bytes_until_nul(&buf)
        .ok()
        .and_then(|name| name.to_str().ok())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "localhost".to_string())
}
