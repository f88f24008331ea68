//! In-memory batch of unsent records and its on-disk forms.
//!
//! # Files
//!
//! - `pending_batch.json` - the batch left unsent at the last shutdown.
//!   There is exactly one such path; [`SampleBuffer::reload`] consumes it.
//! - `discarded_batch_<UTC time>.json` - one per overflow eviction, never
//!   deleted by the tracker.
//!
//! Both are plain JSON objects mapping timestamp strings to records, written
//! through a temporary file and a rename.
//!
//! # Overflow
//!
//! The buffer is bounded by the gzip size of its JSON form, the same size the
//! datagram would have. An oversized batch is never trimmed: the whole batch
//! goes to a discard file and the buffer starts over empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError};
use crate::record::{Batch, Record, RecordKind};

/// File name of the pending batch inside the home directory.
pub const PENDING_BATCH_FILE: &str = "pending_batch.json";

/// Prefix of discard file names.
const DISCARD_PREFIX: &str = "discarded_batch_";

/// Errors writing a batch to disk or measuring it.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// What happened during an overflow check.
#[derive(Debug, PartialEq, Eq)]
pub enum Overflow {
    /// The batch fits; nothing changed.
    WithinLimit { size: usize },
    /// The batch was written to `path` and cleared.
    Discarded { size: usize, path: PathBuf },
    /// The batch was cleared but could not be saved.
    Lost { size: usize },
}

/// Result of [`SampleBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Stored,
    /// The batch already holds an error of this kind.
    RepeatedError,
    /// The batch already holds a record for this second.
    SameSecond,
}

/// The tracker's batch of unsent records.
///
/// At most one record of each error kind is kept per batch, so a location
/// service that keeps failing produces one report per send cycle instead of
/// one per sample.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    batch: Batch,
    has_command_error: bool,
    has_api_error: bool,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing batch (typically a reloaded pending batch).
    pub fn with_batch(batch: Batch) -> Self {
        let mut buffer = Self::new();
        for (ts, record) in batch {
            buffer.insert(ts, record);
        }
        buffer
    }

    /// Add a record.
    ///
    /// Keys are whole seconds, so a second record for an occupied second is
    /// refused and the first one kept. An error refused this way does not
    /// count as the batch's error report.
    pub fn insert(&mut self, timestamp: i64, record: Record) -> Insertion {
        let kind = record.kind();
        let seen = match kind {
            RecordKind::Location => None,
            RecordKind::CommandError => Some(&mut self.has_command_error),
            RecordKind::ApiError => Some(&mut self.has_api_error),
        };
        if seen.as_deref() == Some(&true) {
            debug!(ts = timestamp, ?kind, "Repeated error record dropped");
            return Insertion::RepeatedError;
        }
        if self.batch.contains_key(&timestamp) {
            debug!(ts = timestamp, ?kind, "Second already sampled, record dropped");
            return Insertion::SameSecond;
        }
        if let Some(seen) = seen {
            *seen = true;
        }
        self.batch.insert(timestamp, record);
        Insertion::Stored
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Empty the batch and forget which error kinds it contained.
    pub fn clear(&mut self) {
        self.batch.clear();
        self.has_command_error = false;
        self.has_api_error = false;
    }

    /// gzip size of the batch's JSON form.
    pub fn compressed_size(&self) -> Result<usize, BufferError> {
        Ok(codec::compressed_size(&self.batch)?)
    }

    /// Evict the whole batch to a discard file in `dir` if it exceeds `max_bytes`.
    ///
    /// An oversized batch is cleared even when the discard file cannot be
    /// written.
    pub fn enforce_limit(&mut self, max_bytes: usize, dir: &Path) -> Result<Overflow, BufferError> {
        let size = self.compressed_size()?;
        if size <= max_bytes {
            return Ok(Overflow::WithinLimit { size });
        }

        let outcome = match write_discard_file(&self.batch, dir) {
            Ok(path) => {
                warn!(
                    size,
                    max = max_bytes,
                    records = self.batch.len(),
                    path = %path.display(),
                    "Batch over size limit, discarded to file"
                );
                Overflow::Discarded { size, path }
            }
            Err(e) => {
                warn!(size, max = max_bytes, error = %e, "Batch over size limit and could not be saved, dropping it");
                Overflow::Lost { size }
            }
        };
        self.clear();
        Ok(outcome)
    }

    /// Write the batch to the pending-batch path.
    pub fn persist(&self, path: &Path) -> Result<(), BufferError> {
        let json = serde_json::to_vec(&self.batch)?;
        write_atomic(path, &json)?;
        info!(path = %path.display(), records = self.batch.len(), "Pending batch saved");
        Ok(())
    }

    /// Load and delete the pending batch at `path`.
    ///
    /// A missing, unreadable or corrupt file yields an empty batch. The file
    /// is removed as soon as it has been read so it can never be replayed.
    pub fn reload(path: &Path) -> Batch {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Batch::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read pending batch");
                return Batch::new();
            }
        };

        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove pending batch file");
        }

        match serde_json::from_slice::<Batch>(&content) {
            Ok(batch) => {
                info!(path = %path.display(), records = batch.len(), "Pending batch reloaded");
                batch
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Pending batch is corrupt, ignoring it");
                Batch::new()
            }
        }
    }
}

/// Path of the pending batch inside a home directory.
pub fn pending_batch_path(home_dir: &Path) -> PathBuf {
    home_dir.join(PENDING_BATCH_FILE)
}

fn write_discard_file(batch: &Batch, dir: &Path) -> Result<PathBuf, BufferError> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let mut path = dir.join(format!("{}{}.json", DISCARD_PREFIX, stamp));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}{}_{}.json", DISCARD_PREFIX, stamp, n));
        n += 1;
    }

    let json = serde_json::to_vec(batch)?;
    write_atomic(&path, &json)?;
    Ok(path)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BufferError> {
    let to_error = |source: io::Error| BufferError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data).map_err(to_error)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        to_error(e)
    })
}
