//! Receiving side: authentication, admission control and storage.
//!
//! # Components
//!
//! - [`CredentialTable`] - hostname → (host id, pre-shared key)
//! - [`AdmissionPolicy`] - temporal filters applied per record
//! - [`GpxSink`] - per-host GPX track files
//! - [`PostgresSink`] - optional relational store
//! - [`IngestService`] - the UDP receive loop tying them together

mod admission;
mod credentials;
mod gpx;
mod postgres;
mod service;

use std::net::SocketAddr;

use thiserror::Error;

pub use admission::{AdmissionPolicy, AdmittedFix, Rejection};
pub use credentials::{CredentialParseError, CredentialTable, HostCredential};
pub use gpx::GpxSink;
pub use postgres::{InsertOutcome, PostgresSink};
pub use service::{BatchReport, IngestService, IngestStats};

/// Failure writing to one of the sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Fatal ingest service errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
