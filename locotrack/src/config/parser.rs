//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::defaults::*;
use super::file::ConfigFileError;
use super::settings::{ConfigFile, IngestSettings, LoggingSettings, TrackerSettings};
use crate::codec::MAX_DATAGRAM_SIZE;
use crate::ingest::CredentialTable;
use crate::logging::LOG_LEVELS;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Sections that are present are fully validated, absent ones stay `None`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let tracker = match ini.section(Some("tracker")) {
        Some(section) => Some(parse_tracker(section)?),
        None => None,
    };
    let ingest = match ini.section(Some("ingest")) {
        Some(section) => Some(parse_ingest(section)?),
        None => None,
    };
    Ok(ConfigFile { tracker, ingest })
}

fn parse_tracker(section: &Properties) -> Result<TrackerSettings, ConfigFileError> {
    const SECTION: &str = "tracker";

    let remote_host = required(section, SECTION, "remote_host")?;
    let remote_psk = required(section, SECTION, "remote_psk")?;
    let mut config = TrackerSettings::new(remote_host, remote_psk);

    if let Some(v) = non_empty(section, "my_name") {
        config.my_name = v.to_string();
    }
    if let Some(v) = non_empty(section, "remote_port") {
        config.remote_port = parse_port(SECTION, "remote_port", v)?;
    }
    if let Some(v) = non_empty(section, "location_cmd") {
        config.location_cmd = v.split_whitespace().map(str::to_string).collect();
    } else if section.contains_key("location_cmd") {
        return Err(invalid(SECTION, "location_cmd", "", "must name a command"));
    }
    if let Some(v) = non_empty(section, "location_cmd_timeout") {
        config.location_cmd_timeout = parse_period(SECTION, "location_cmd_timeout", v)?;
    }
    if let Some(v) = non_empty(section, "time_to_live") {
        let secs: f64 = parse_number(SECTION, "time_to_live", v, "must be a number of seconds")?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(invalid(SECTION, "time_to_live", v, "must be zero or positive"));
        }
        config.time_to_live = if secs > 0.0 {
            Some(seconds(SECTION, "time_to_live", v, secs)?)
        } else {
            None
        };
    } else {
        config.time_to_live = (DEFAULT_TIME_TO_LIVE_SECS > 0)
            .then(|| Duration::from_secs(DEFAULT_TIME_TO_LIVE_SECS));
    }
    if let Some(v) = non_empty(section, "sample_period") {
        // Samples are keyed by whole seconds.
        let period = parse_period(SECTION, "sample_period", v)?;
        if period < Duration::from_secs(1) {
            return Err(invalid(SECTION, "sample_period", v, "must be at least one second"));
        }
        config.sample_period = period;
    }
    if let Some(v) = non_empty(section, "send_data_period") {
        config.send_data_period = parse_period(SECTION, "send_data_period", v)?;
    }
    if let Some(v) = non_empty(section, "max_buffer") {
        let bytes: usize = parse_number(SECTION, "max_buffer", v, "must be a positive integer (bytes)")?;
        if bytes == 0 {
            return Err(invalid(SECTION, "max_buffer", v, "must be a positive integer (bytes)"));
        }
        if bytes > MAX_DATAGRAM_SIZE {
            return Err(invalid(
                SECTION,
                "max_buffer",
                v,
                &format!("must not exceed the {} byte datagram limit", MAX_DATAGRAM_SIZE),
            ));
        }
        config.max_buffer = bytes;
    }
    if let Some(v) = non_empty(section, "home_dir") {
        config.home_dir = expand_tilde(v);
    }
    config.logging = parse_logging(section, SECTION)?;

    Ok(config)
}

fn parse_ingest(section: &Properties) -> Result<IngestSettings, ConfigFileError> {
    const SECTION: &str = "ingest";

    let psk = required(section, SECTION, "psk")?;
    let credentials = CredentialTable::parse(&psk).map_err(|e| ConfigFileError::InvalidValue {
        section: SECTION.to_string(),
        key: "psk".to_string(),
        value: "(hidden)".to_string(),
        reason: e.to_string(),
    })?;
    let mut config = IngestSettings::new(credentials);

    let address = non_empty(section, "local_address").unwrap_or(DEFAULT_LOCAL_ADDRESS);
    config.local_address = parse_number::<IpAddr>(
        SECTION,
        "local_address",
        address,
        "must be an IPv4 or IPv6 address",
    )?;
    if let Some(v) = non_empty(section, "local_port") {
        config.local_port = parse_port(SECTION, "local_port", v)?;
    }
    if let Some(v) = non_empty(section, "max_recv_delay_sec") {
        let secs: i64 = parse_number(
            SECTION,
            "max_recv_delay_sec",
            v,
            "must be a whole number of seconds",
        )?;
        if secs < 0 {
            return Err(invalid(SECTION, "max_recv_delay_sec", v, "must not be negative"));
        }
        config.max_recv_delay_sec = secs;
    }
    if let Some(v) = non_empty(section, "max_elapsed_location_sec") {
        let secs: f64 = parse_number(
            SECTION,
            "max_elapsed_location_sec",
            v,
            "must be a number of seconds",
        )?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(invalid(
                SECTION,
                "max_elapsed_location_sec",
                v,
                "must not be negative",
            ));
        }
        config.max_elapsed_location_sec = secs;
    }
    config.pg_connect = non_empty(section, "pg_connect").map(str::to_string);
    if let Some(v) = non_empty(section, "home_dir") {
        config.home_dir = expand_tilde(v);
    }
    config.logging = parse_logging(section, SECTION)?;

    Ok(config)
}

fn parse_logging(section: &Properties, name: &str) -> Result<LoggingSettings, ConfigFileError> {
    let mut logging = LoggingSettings::default();
    if let Some(v) = non_empty(section, "log_to") {
        logging.log_to = Some(expand_tilde(v));
    }
    if let Some(v) = non_empty(section, "logging") {
        let level = v.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(
                name,
                "logging",
                v,
                "must be one of: error, warn, info, debug, trace",
            ));
        }
        logging.level = level;
    }
    Ok(logging)
}

/// Trimmed value of `key`, treating an empty value as unset.
fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn required(section: &Properties, name: &str, key: &str) -> Result<String, ConfigFileError> {
    non_empty(section, key)
        .map(str::to_string)
        .ok_or_else(|| ConfigFileError::MissingValue {
            section: name.to_string(),
            key: key.to_string(),
        })
}

fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_port(section: &str, key: &str, value: &str) -> Result<u16, ConfigFileError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid(section, key, value, "must be a port number (1-65535)")),
    }
}

/// A strictly positive number of seconds.
fn parse_period(section: &str, key: &str, value: &str) -> Result<Duration, ConfigFileError> {
    let reason = "must be a positive number of seconds";
    let secs: f64 = parse_number(section, key, value, reason)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid(section, key, value, reason));
    }
    seconds(section, key, value, secs)
}

/// `secs` as a `Duration`; values too large to represent are invalid.
fn seconds(section: &str, key: &str, value: &str, secs: f64) -> Result<Duration, ConfigFileError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| invalid(section, key, value, "is too large a number of seconds"))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand a leading `~` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
