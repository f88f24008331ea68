//! UDP ingest loop.
//!
//! Receives one datagram at a time, authenticates it, runs every record
//! through the [`AdmissionPolicy`] in ascending timestamp order and writes
//! admitted fixes to the GPX sink and, when configured, the relational sink.
//! Nothing is ever sent back to the tracker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::admission::AdmissionPolicy;
use super::credentials::CredentialTable;
use super::gpx::GpxSink;
use super::postgres::PostgresSink;
use super::IngestError;
use crate::codec::{self, DecodeError};
use crate::config::IngestSettings;
use crate::time::unix_now;

/// Receive buffer size: the largest possible UDP payload.
const MAX_PACKET_SIZE: usize = 65_536;

/// How often the loop wakes up to check for shutdown while idle.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome of processing one authenticated batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub accepted: usize,
    pub rejected: usize,
    pub sink_errors: usize,
}

/// Running totals for the lifetime of the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub datagrams: u64,
    pub malformed: u64,
    pub auth_failures: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub sink_errors: u64,
}

/// The receiving end of the tracking pipeline.
pub struct IngestService {
    credentials: CredentialTable,
    policy: AdmissionPolicy,
    gpx: GpxSink,
    database: Option<PostgresSink>,
    stats: IngestStats,
}

impl IngestService {
    pub fn new(credentials: CredentialTable, policy: AdmissionPolicy, gpx: GpxSink) -> Self {
        Self {
            credentials,
            policy,
            gpx,
            database: None,
            stats: IngestStats::default(),
        }
    }

    /// Build the service described by the `[ingest]` settings.
    ///
    /// GPX files go to the home directory. When `pg_connect` is set but the
    /// database is unreachable, the service runs without the relational sink.
    pub async fn from_settings(settings: &IngestSettings) -> Self {
        let service = Self::new(
            settings.credentials.clone(),
            settings.admission_policy(),
            GpxSink::new(&settings.home_dir),
        );

        match settings.pg_connect.as_deref() {
            Some(url) => match PostgresSink::connect(url).await {
                Ok(database) => service.with_database(database),
                Err(e) => {
                    warn!(error = %e, "Relational store unavailable, continuing with GPX only");
                    service
                }
            },
            None => service,
        }
    }

    /// Also store admitted fixes in the relational sink.
    pub fn with_database(mut self, database: PostgresSink) -> Self {
        self.database = Some(database);
        self
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Bind the receive socket.
    pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, IngestError> {
        UdpSocket::bind(addr)
            .await
            .map_err(|source| IngestError::Bind { addr, source })
    }

    /// Serve datagrams from `socket` until `shutdown` is set.
    pub async fn run(
        mut self,
        socket: UdpSocket,
        shutdown: &AtomicBool,
    ) -> Result<IngestStats, IngestError> {
        info!(
            local_addr = ?socket.local_addr().ok(),
            hosts = self.credentials.len(),
            database = self.database.is_some(),
            "Ingest service started"
        );

        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        while !shutdown.load(Ordering::SeqCst) {
            match tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buffer)).await {
                Ok(Ok((len, peer))) => {
                    debug!(%peer, len, "Datagram received");
                    let _ = self.handle_datagram(&buffer[..len], unix_now()).await;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "UDP receive error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_) => {}
            }
        }

        let stats = self.stats;
        info!(
            datagrams = stats.datagrams,
            accepted = stats.accepted,
            rejected = stats.rejected,
            auth_failures = stats.auth_failures,
            malformed = stats.malformed,
            "Ingest service stopped"
        );
        Ok(stats)
    }

    /// Authenticate one datagram and store its admissible records.
    ///
    /// Decode failures are logged and returned; they never stop the service.
    pub async fn handle_datagram(
        &mut self,
        payload: &[u8],
        received_at: i64,
    ) -> Result<BatchReport, DecodeError> {
        self.stats.datagrams += 1;

        let envelope = match codec::decode(payload, &self.credentials) {
            Ok(envelope) => envelope,
            Err(e) => {
                if e.is_auth_failure() {
                    self.stats.auth_failures += 1;
                } else {
                    self.stats.malformed += 1;
                }
                warn!(error = %e, len = payload.len(), "Datagram dropped");
                return Err(e);
            }
        };

        let hostname = envelope.hostname.as_str();
        // Presence was checked by decode.
        let host_id = self
            .credentials
            .get(hostname)
            .map(|c| c.host_id)
            .unwrap_or_default();

        let mut report = BatchReport::default();
        if envelope.skipped_records > 0 {
            info!(host = hostname, skipped = envelope.skipped_records, "Unparseable records skipped");
            report.rejected += envelope.skipped_records;
        }
        for (&timestamp, record) in &envelope.termux_locations {
            let fix = match self.policy.admit(timestamp, record, received_at) {
                Ok(fix) => fix,
                Err(rejection) => {
                    info!(host = hostname, ts = timestamp, reason = %rejection, "Record rejected");
                    report.rejected += 1;
                    continue;
                }
            };

            if let Err(e) = self.gpx.append(hostname, &fix) {
                warn!(host = hostname, ts = timestamp, error = %e, "GPX write failed");
                report.sink_errors += 1;
            }
            if let Some(database) = &self.database {
                if let Err(e) = database.insert(host_id, received_at, &fix).await {
                    warn!(host = hostname, ts = timestamp, error = %e, "Database insert failed");
                    report.sink_errors += 1;
                }
            }

            debug!(
                host = hostname,
                ts = timestamp,
                lat = format!("{:.5}", fix.latitude),
                lon = format!("{:.5}", fix.longitude),
                "Record accepted"
            );
            report.accepted += 1;
        }

        self.stats.accepted += report.accepted as u64;
        self.stats.rejected += report.rejected as u64;
        self.stats.sink_errors += report.sink_errors as u64;

        info!(
            host = hostname,
            accepted = report.accepted,
            rejected = report.rejected,
            "Batch processed"
        );
        Ok(report)
    }
}
