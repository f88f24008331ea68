//! Configuration for the tracker and the ingest service.
//!
//! Both roles read the same INI file (default `~/.locotrack/config.ini`),
//! each from its own section:
//!
//! ```ini
//! [tracker]
//! remote_host = tracks.example.org
//! remote_psk = s3cret
//! sample_period = 5
//!
//! [ingest]
//! psk = phone:1:s3cret
//! pg_connect = postgres://tracker@localhost/tracks
//! ```
//!
//! Values are validated once at load time; the resulting structs are passed
//! by reference to the components that need them.

mod defaults;
mod file;
mod parser;
mod settings;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{ConfigFile, IngestSettings, LoggingSettings, TrackerSettings};
