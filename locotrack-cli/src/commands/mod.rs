//! CLI command implementations.
//!
//! - [`track`] - Tracker (sampling and sending)
//! - [`ingest`] - Ingest service (receiving and storing)
//! - [`config`] - Configuration inspection (path, show)

pub mod config;
pub mod ingest;
pub mod track;
