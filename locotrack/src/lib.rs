//! locotrack - Periodic location tracking over UDP
//!
//! A tracker samples a positioning command, buffers the samples, and sends
//! them in signed, compressed datagrams. An ingest service authenticates the
//! datagrams, filters records by age, and stores accepted fixes in per-host
//! GPX files and optionally PostgreSQL.
//!
//! ```text
//! source → buffer → codec → UDP → ingest → GPX / PostgreSQL
//! ```
//!
//! # Tracker
//!
//! ```ignore
//! use locotrack::config::ConfigFile;
//! use locotrack::source::CommandLocationSource;
//! use locotrack::tracker::{Tracker, UdpTransport};
//!
//! let config = ConfigFile::load()?;
//! let settings = config.tracker()?;
//! let source = CommandLocationSource::new(settings.location_cmd.clone());
//! let mut tracker = Tracker::new(settings, source, UdpTransport::from_settings(settings));
//! tracker.start(true)?;
//! tracker.run(&stop_flag).await?;
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod ingest;
pub mod instance;
pub mod logging;
pub mod panic;
pub mod record;
pub mod source;
pub mod time;
pub mod tracker;

/// Version of the locotrack library and CLI.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
