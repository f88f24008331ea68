//! Settings structs for the configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file. A section
//! that is absent from the file stays `None`; it is only an error when the
//! role that needs it starts.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;
use crate::ingest::{AdmissionPolicy, CredentialTable};

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// `[tracker]` section
    pub tracker: Option<TrackerSettings>,
    /// `[ingest]` section
    pub ingest: Option<IngestSettings>,
}

/// Log output shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Additional log file; stdout only when `None`
    pub log_to: Option<PathBuf>,
    /// Default filter level
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_to: None,
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Hostname announced in every datagram
    pub my_name: String,
    /// Ingest server host name or address
    pub remote_host: String,
    /// Ingest server UDP port
    pub remote_port: u16,
    /// Pre-shared key for signing
    pub remote_psk: String,
    /// Positioning command, program first
    pub location_cmd: Vec<String>,
    /// Limit on a single positioning command run
    pub location_cmd_timeout: Duration,
    /// Total run time; `None` runs until stopped
    pub time_to_live: Option<Duration>,
    /// Pause between samples
    pub sample_period: Duration,
    /// Minimum interval between send attempts
    pub send_data_period: Duration,
    /// Ceiling on the compressed batch size in bytes
    pub max_buffer: usize,
    /// Directory for the lock, pending and discard files
    pub home_dir: PathBuf,
    pub logging: LoggingSettings,
}

impl TrackerSettings {
    /// Settings with every optional value at its default.
    pub fn new(remote_host: impl Into<String>, remote_psk: impl Into<String>) -> Self {
        Self {
            my_name: system_hostname(),
            remote_host: remote_host.into(),
            remote_port: DEFAULT_PORT,
            remote_psk: remote_psk.into(),
            location_cmd: default_location_cmd(),
            location_cmd_timeout: Duration::from_secs(DEFAULT_LOCATION_CMD_TIMEOUT_SECS),
            time_to_live: None,
            sample_period: Duration::from_secs(DEFAULT_SAMPLE_PERIOD_SECS),
            send_data_period: Duration::from_secs(DEFAULT_SEND_DATA_PERIOD_SECS),
            max_buffer: DEFAULT_MAX_BUFFER,
            home_dir: default_home_dir(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Ingest service configuration.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Known senders and their keys
    pub credentials: CredentialTable,
    pub local_address: IpAddr,
    pub local_port: u16,
    /// Oldest accepted sample age at receipt, in seconds
    pub max_recv_delay_sec: i64,
    /// Oldest accepted fix age at sampling, in seconds
    pub max_elapsed_location_sec: f64,
    /// PostgreSQL URL; the relational sink is disabled when `None`
    pub pg_connect: Option<String>,
    /// Directory for GPX files
    pub home_dir: PathBuf,
    pub logging: LoggingSettings,
}

impl IngestSettings {
    /// Settings with every optional value at its default.
    pub fn new(credentials: CredentialTable) -> Self {
        Self {
            credentials,
            local_address: IpAddr::from([0, 0, 0, 0]),
            local_port: DEFAULT_PORT,
            max_recv_delay_sec: DEFAULT_MAX_RECV_DELAY_SECS,
            max_elapsed_location_sec: DEFAULT_MAX_ELAPSED_LOCATION_SECS,
            pg_connect: None,
            home_dir: default_home_dir(),
            logging: LoggingSettings::default(),
        }
    }

    /// Address the receive socket binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.local_address, self.local_port)
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy {
            max_recv_delay_secs: self.max_recv_delay_sec,
            max_elapsed_secs: self.max_elapsed_location_sec,
        }
    }
}
