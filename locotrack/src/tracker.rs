//! The tracking loop.
//!
//! ```text
//! INIT ──start()──▶ RUNNING ──ttl / stop flag──▶ DRAINING ──▶ TERMINATED
//! ```
//!
//! - `start` takes the instance lock and reloads the pending batch.
//! - `run` samples every `sample_period` and attempts a send once at least
//!   `send_data_period` has passed since the previous attempt. A failed send
//!   leaves the batch in place unless it has outgrown `max_buffer`, in which
//!   case it is discarded to a file.
//! - `drain` makes one last send attempt, persists whatever is left, and
//!   releases the lock. It runs at most once.
//!
//! Termination signals only set a flag. The loop checks it before every tick
//! and while sleeping, so draining always happens on the loop's own control
//! flow and never in the middle of a send or a sample.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::{pending_batch_path, BufferError, Insertion, Overflow, SampleBuffer};
use crate::codec::{self, CodecError};
use crate::config::TrackerSettings;
use crate::instance::{lock_file_path, InstanceLock, LockError};
use crate::panic;
use crate::source::LocationSource;
use crate::time::{Clock, SystemClock};

/// Longest uninterrupted sleep; bounds the reaction time to a stop request.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Errors from the tracking loop.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Tracker cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: TrackerState,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to send datagram: {0}")]
    Send(#[source] io::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Lifecycle of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Init,
    Running,
    Draining,
    Terminated,
}

/// Counters for one tracker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Samples acquired
    pub samples: u64,
    /// Error samples dropped as repeats within a batch
    pub dropped_errors: u64,
    /// Samples dropped because their second was already in the batch
    pub dropped_same_second: u64,
    /// Datagrams sent
    pub sends: u64,
    /// Send attempts that failed
    pub send_failures: u64,
    /// Batches evicted for exceeding `max_buffer`
    pub discarded_batches: u64,
    /// Whether the final batch went to the pending file
    pub persisted_on_exit: bool,
}

/// Delivery of an encoded datagram.
pub trait Transport {
    /// Send one payload.
    fn send(&self, payload: &[u8]) -> impl Future<Output = io::Result<()>>;
}

/// Sends datagrams to the ingest server over UDP.
///
/// The host is resolved on every send so a tracker started without network
/// access recovers once it comes back.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    host: String,
    port: u16,
}

impl UdpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Transport to the server named in the tracker settings.
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self::new(settings.remote_host.clone(), settings.remote_port)
    }
}

impl Transport for UdpTransport {
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {}", self.host),
                )
            })?;

        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        let sent = socket.send_to(payload, addr).await?;
        if sent != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("datagram truncated ({} of {} bytes)", sent, payload.len()),
            ));
        }
        debug!(%addr, bytes = sent, "Datagram sent");
        Ok(())
    }
}

/// The periodic sampler and sender.
pub struct Tracker<'a, S, T, C = SystemClock> {
    settings: &'a TrackerSettings,
    source: S,
    transport: T,
    clock: C,
    buffer: SampleBuffer,
    state: TrackerState,
    lock: Option<InstanceLock>,
    stats: TrackerStats,
}

impl<'a, S, T> Tracker<'a, S, T, SystemClock>
where
    S: LocationSource,
    T: Transport,
{
    /// Create a tracker that timestamps samples with the system clock.
    pub fn new(settings: &'a TrackerSettings, source: S, transport: T) -> Self {
        Self {
            settings,
            source,
            transport,
            clock: SystemClock,
            buffer: SampleBuffer::new(),
            state: TrackerState::Init,
            lock: None,
            stats: TrackerStats::default(),
        }
    }
}

impl<'a, S, T, C> Tracker<'a, S, T, C>
where
    S: LocationSource,
    T: Transport,
    C: Clock,
{
    /// Replace the clock used for sample timestamps.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Tracker<'a, S, T, C2> {
        Tracker {
            settings: self.settings,
            source: self.source,
            transport: self.transport,
            clock,
            buffer: self.buffer,
            state: self.state,
            lock: self.lock,
            stats: self.stats,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// The current unsent batch.
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn pending_path(&self) -> PathBuf {
        pending_batch_path(&self.settings.home_dir)
    }

    /// INIT → RUNNING: take the instance lock and reload the pending batch.
    pub fn start(&mut self, preempt: bool) -> Result<(), TrackerError> {
        if self.state != TrackerState::Init {
            return Err(TrackerError::InvalidState {
                action: "start",
                state: self.state,
            });
        }

        let lock_path = lock_file_path(&self.settings.home_dir);
        let lock = InstanceLock::acquire(&lock_path, preempt)?;
        panic::register_lock_file(lock.path());
        self.lock = Some(lock);

        let pending = SampleBuffer::reload(&self.pending_path());
        if !pending.is_empty() {
            info!(records = pending.len(), "Resuming with pending batch");
        }
        self.buffer = SampleBuffer::with_batch(pending);
        self.state = TrackerState::Running;

        info!(
            name = %self.settings.my_name,
            remote = %format!("{}:{}", self.settings.remote_host, self.settings.remote_port),
            sample_period = ?self.settings.sample_period,
            send_data_period = ?self.settings.send_data_period,
            time_to_live = ?self.settings.time_to_live,
            "Tracker started"
        );
        Ok(())
    }

    /// RUNNING until the time to live expires or `shutdown` is set, then drain.
    pub async fn run(&mut self, shutdown: &AtomicBool) -> Result<TrackerStats, TrackerError> {
        if self.state != TrackerState::Running {
            return Err(TrackerError::InvalidState {
                action: "run",
                state: self.state,
            });
        }

        let started = Instant::now();
        let mut last_send = Instant::now();

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Stop requested");
                break;
            }
            if let Some(ttl) = self.settings.time_to_live {
                if started.elapsed() >= ttl {
                    info!(?ttl, "Time to live reached");
                    break;
                }
            }

            self.sample().await;

            if last_send.elapsed() >= self.settings.send_data_period {
                last_send = Instant::now();
                self.flush().await;
            }

            if !sleep_unless_stopped(self.settings.sample_period, shutdown).await {
                info!("Stop requested");
                break;
            }
        }

        self.drain().await;
        Ok(self.stats)
    }

    /// DRAINING → TERMINATED: final send, persist leftovers, release the lock.
    ///
    /// Only the first call after `start` does anything.
    pub async fn drain(&mut self) {
        if self.state != TrackerState::Running {
            debug!(state = ?self.state, "Drain skipped");
            return;
        }
        self.state = TrackerState::Draining;

        if !self.buffer.is_empty() {
            match self.send_batch().await {
                Ok(()) => {
                    self.stats.sends += 1;
                    info!(records = self.buffer.len(), "Final batch sent");
                    self.buffer.clear();
                }
                Err(e) => {
                    self.stats.send_failures += 1;
                    warn!(error = %e, records = self.buffer.len(), "Final send failed, saving batch");
                    match self.buffer.persist(&self.pending_path()) {
                        Ok(()) => self.stats.persisted_on_exit = true,
                        Err(e) => warn!(error = %e, "Failed to save pending batch, samples lost"),
                    }
                }
            }
        }

        if let Some(lock) = self.lock.take() {
            lock.release();
            panic::unregister_lock_file();
        }
        self.state = TrackerState::Terminated;
        info!(
            samples = self.stats.samples,
            sends = self.stats.sends,
            send_failures = self.stats.send_failures,
            discarded = self.stats.discarded_batches,
            "Tracker stopped"
        );
    }

    async fn sample(&mut self) {
        let timestamp = self.clock.now_unix();
        let record = self
            .source
            .acquire(self.settings.location_cmd_timeout)
            .await;
        self.stats.samples += 1;
        match self.buffer.insert(timestamp, record) {
            Insertion::Stored => {}
            Insertion::RepeatedError => self.stats.dropped_errors += 1,
            Insertion::SameSecond => self.stats.dropped_same_second += 1,
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        match self.send_batch().await {
            Ok(()) => {
                self.stats.sends += 1;
                debug!(records = self.buffer.len(), "Batch sent");
                self.buffer.clear();
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(error = %e, records = self.buffer.len(), "Send failed, keeping batch");
                match self
                    .buffer
                    .enforce_limit(self.settings.max_buffer, &self.settings.home_dir)
                {
                    Ok(Overflow::WithinLimit { size }) => {
                        debug!(size, max = self.settings.max_buffer, "Batch within limit")
                    }
                    Ok(Overflow::Discarded { .. }) | Ok(Overflow::Lost { .. }) => {
                        self.stats.discarded_batches += 1
                    }
                    Err(e) => warn!(error = %e, "Failed to measure batch size"),
                }
            }
        }
    }

    async fn send_batch(&self) -> Result<(), TrackerError> {
        let payload = codec::encode(
            &self.settings.my_name,
            self.buffer.batch(),
            &self.settings.remote_psk,
        )?;
        self.transport
            .send(&payload)
            .await
            .map_err(TrackerError::Send)
    }
}

/// Sleep for `period` in short slices. Returns `false` if a stop was requested.
async fn sleep_unless_stopped(period: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + period;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(SLEEP_SLICE)).await;
    }
}
