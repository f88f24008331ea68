//! Temporal admission control for received records.
//!
//! Checks run in a fixed order and the first failing one decides:
//!
//! 1. future-dated (`timestamp > received_at`, sender clock ahead)
//! 2. delivered too late (`received_at - timestamp > max_recv_delay`)
//! 3. stale fix (`elapsedMs / 1000 > max_elapsed`)
//! 4. no coordinates (includes error reports)
//!
//! Both thresholds are inclusive on the accept side: a delay exactly equal to
//! the maximum is admitted.

use thiserror::Error;

use crate::record::{Location, Record};

/// Why a record was not admitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("timestamp is in the future (delay {delay_secs}s)")]
    FutureTimestamp { delay_secs: i64 },

    #[error("received too late (delay {delay_secs}s > {max_secs}s)")]
    TooOld { delay_secs: i64, max_secs: i64 },

    #[error("fix is stale (elapsed {elapsed_secs:.3}s > {max_secs}s)")]
    TooStale { elapsed_secs: f64, max_secs: f64 },

    #[error("no coordinates{}", .error.as_ref().map(|e| format!(" (sender error: {})", e)).unwrap_or_default())]
    MissingCoordinates { error: Option<String> },
}

/// A record that passed every admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmittedFix<'a> {
    /// Acquisition time on the sender (Unix seconds).
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Age of the fix when it was sampled.
    pub elapsed_secs: f64,
    pub location: &'a Location,
}

impl AdmittedFix<'_> {
    /// Estimated time the platform actually obtained the fix (Unix seconds).
    pub fn fix_time(&self) -> f64 {
        self.timestamp as f64 - self.elapsed_secs
    }
}

/// Admission thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionPolicy {
    /// Maximum accepted `received_at - timestamp`, in seconds.
    pub max_recv_delay_secs: i64,
    /// Maximum accepted fix age, in seconds.
    pub max_elapsed_secs: f64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_recv_delay_secs: 6 * 3600,
            max_elapsed_secs: 300.0,
        }
    }
}

impl AdmissionPolicy {
    /// Decide whether the record sampled at `timestamp` is stored.
    pub fn admit<'a>(
        &self,
        timestamp: i64,
        record: &'a Record,
        received_at: i64,
    ) -> Result<AdmittedFix<'a>, Rejection> {
        let delay_secs = received_at - timestamp;
        if delay_secs < 0 {
            return Err(Rejection::FutureTimestamp { delay_secs });
        }
        if delay_secs > self.max_recv_delay_secs {
            return Err(Rejection::TooOld {
                delay_secs,
                max_secs: self.max_recv_delay_secs,
            });
        }

        let location = match record {
            Record::Location(location) => location,
            other => {
                return Err(Rejection::MissingCoordinates {
                    error: other.error_message().map(str::to_string),
                })
            }
        };

        let elapsed_secs = location.elapsed_secs();
        if elapsed_secs > self.max_elapsed_secs {
            return Err(Rejection::TooStale {
                elapsed_secs,
                max_secs: self.max_elapsed_secs,
            });
        }

        let (latitude, longitude) = location
            .coordinates()
            .ok_or(Rejection::MissingCoordinates { error: None })?;

        Ok(AdmittedFix {
            timestamp,
            latitude,
            longitude,
            elapsed_secs,
            location,
        })
    }
}
