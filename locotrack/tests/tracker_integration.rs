//! Integration tests for the tracking loop's lifecycle.
//!
//! These tests verify:
//! - A stop request during the sleep ends the run with a final send
//! - Samples that could not be sent survive a restart via the pending file
//! - A positioning command that keeps timing out yields one error per batch
//! - Only one tracker can hold a home directory at a time

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use locotrack::codec;
use locotrack::config::TrackerSettings;
use locotrack::ingest::CredentialTable;
use locotrack::instance::{lock_file_path, LockError};
use locotrack::record::{Batch, Location, Record, RecordKind};
use locotrack::source::{CommandLocationSource, LocationSource};
use locotrack::time::AnchoredClock;
use locotrack::tracker::{Tracker, TrackerError, TrackerState, Transport};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Records every payload; fails while `down` is set.
#[derive(Clone, Default)]
struct MemoryTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    down: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "offline"));
        }
        self.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

impl MemoryTransport {
    fn batches(&self) -> Vec<Batch> {
        let credentials = CredentialTable::parse("dev1:1:secret").unwrap();
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|payload| codec::decode(payload, &credentials).unwrap().termux_locations)
            .collect()
    }
}

/// Plays back a script, then sets `stop` once the script is exhausted.
struct ScriptedSource {
    script: VecDeque<Record>,
    stop: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn fixes(count: usize, stop: Arc<AtomicBool>) -> Self {
        let script = (0..count)
            .map(|i| {
                Record::Location(Location {
                    latitude: Some(45.0 + i as f64 * 0.001),
                    longitude: Some(9.0),
                    ..Default::default()
                })
            })
            .collect();
        Self { script, stop }
    }
}

impl LocationSource for ScriptedSource {
    async fn acquire(&mut self, _timeout: Duration) -> Record {
        let record = self
            .script
            .pop_front()
            .unwrap_or_else(|| Record::command_error("script exhausted"));
        if self.script.is_empty() {
            self.stop.store(true, Ordering::SeqCst);
        }
        record
    }
}

fn settings(home: &TempDir) -> TrackerSettings {
    let mut settings = TrackerSettings::new("127.0.0.1", "secret");
    settings.my_name = "dev1".to_string();
    settings.home_dir = home.path().to_path_buf();
    settings
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_request_drains_with_final_send() {
    let home = TempDir::new().unwrap();
    let settings = settings(&home);
    let stop = Arc::new(AtomicBool::new(false));
    let transport = MemoryTransport::default();

    let mut tracker = Tracker::new(
        &settings,
        ScriptedSource::fixes(3, stop.clone()),
        transport.clone(),
    )
    .with_clock(AnchoredClock::new(1_700_000_000));
    tracker.start(false).unwrap();
    let stats = tracker.run(&stop).await.unwrap();

    // Three samples, no periodic send yet, one final send on the way out.
    assert_eq!(stats.samples, 3);
    assert_eq!(stats.sends, 1);
    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].keys().copied().collect::<Vec<_>>(),
        vec![1_700_000_000, 1_700_000_005, 1_700_000_010]
    );

    assert_eq!(tracker.state(), TrackerState::Terminated);
    assert!(!lock_file_path(home.path()).exists());
}

#[tokio::test(start_paused = true)]
async fn test_unsent_batch_survives_restart() {
    let home = TempDir::new().unwrap();
    let settings = settings(&home);

    // First run: offline the whole time.
    let stop = Arc::new(AtomicBool::new(false));
    let offline = MemoryTransport::default();
    offline.down.store(true, Ordering::SeqCst);
    let mut first = Tracker::new(&settings, ScriptedSource::fixes(4, stop.clone()), offline)
        .with_clock(AnchoredClock::new(1_700_000_000));
    first.start(false).unwrap();
    let stats = first.run(&stop).await.unwrap();
    assert!(stats.persisted_on_exit);
    assert!(first.pending_path().exists());

    // Second run: back online, the old samples go out with the new one.
    let stop = Arc::new(AtomicBool::new(false));
    let online = MemoryTransport::default();
    let mut second = Tracker::new(
        &settings,
        ScriptedSource::fixes(1, stop.clone()),
        online.clone(),
    )
    .with_clock(AnchoredClock::new(1_700_001_000));
    second.start(false).unwrap();
    assert!(!second.pending_path().exists());
    assert_eq!(second.buffer().len(), 4);

    second.run(&stop).await.unwrap();
    let batches = online.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 5);
    assert!(batches[0].contains_key(&1_700_000_000));
    assert!(batches[0].contains_key(&1_700_001_000));
    assert!(!second.pending_path().exists());
}

// =============================================================================
// Positioning failures
// =============================================================================

#[tokio::test]
async fn test_timed_out_command_gives_one_error_per_batch() {
    let home = TempDir::new().unwrap();
    let mut settings = settings(&home);
    settings.location_cmd = vec!["sh".into(), "-c".into(), "sleep 5".into()];
    settings.location_cmd_timeout = Duration::from_millis(30);
    settings.sample_period = Duration::from_millis(10);
    settings.send_data_period = Duration::from_millis(150);
    settings.time_to_live = Some(Duration::from_millis(600));
    let transport = MemoryTransport::default();

    let source = CommandLocationSource::new(settings.location_cmd.clone());
    let mut tracker = Tracker::new(&settings, source, transport.clone());
    tracker.start(false).unwrap();
    let stats = tracker.run(&AtomicBool::new(false)).await.unwrap();

    let batches = transport.batches();
    assert!(stats.samples > stats.sends);
    assert_eq!(batches.len() as u64, stats.sends);
    assert_eq!(stats.dropped_errors, stats.samples - stats.sends);
    for batch in batches {
        assert_eq!(batch.len(), 1);
        let record = batch.values().next().unwrap();
        assert_eq!(record.kind(), RecordKind::CommandError);
        assert!(record.error_message().unwrap().contains("timed out"));
    }
}

// =============================================================================
// Single instance
// =============================================================================

#[tokio::test]
async fn test_second_tracker_on_same_home_is_refused() {
    let home = TempDir::new().unwrap();
    let settings = settings(&home);
    let stop = Arc::new(AtomicBool::new(false));

    let mut first = Tracker::new(
        &settings,
        ScriptedSource::fixes(1, stop.clone()),
        MemoryTransport::default(),
    );
    first.start(false).unwrap();

    let mut second = Tracker::new(
        &settings,
        ScriptedSource::fixes(1, stop.clone()),
        MemoryTransport::default(),
    );
    assert!(matches!(
        second.start(false),
        Err(TrackerError::Lock(LockError::Held { .. }))
    ));
    assert_eq!(second.state(), TrackerState::Init);

    first.run(&stop).await.unwrap();
    assert!(second.start(false).is_ok());
    assert_eq!(
        fs::read_to_string(lock_file_path(home.path())).unwrap(),
        std::process::id().to_string()
    );
}
