//! Wall-clock helpers.
//!
//! Sample keys and admission checks use integer Unix seconds. The tracker
//! reads the clock through the [`Clock`] trait so tests can drive it.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in whole seconds.
///
/// A clock set before 1970 reads as zero rather than failing.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Source of wall-clock timestamps for sample keys.
pub trait Clock: Send + Sync {
    /// Current Unix time in whole seconds.
    fn now_unix(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        unix_now()
    }
}

/// Wall clock read once, then advanced with tokio's monotonic clock.
///
/// Follows paused and advanced tokio time, so sample keys stay distinct when
/// a test fast-forwards through the sampling schedule.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    origin_unix: i64,
    origin: tokio::time::Instant,
}

impl AnchoredClock {
    /// A clock that reads `origin_unix` now.
    pub fn new(origin_unix: i64) -> Self {
        Self {
            origin_unix,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now_unix(&self) -> i64 {
        self.origin_unix + self.origin.elapsed().as_secs() as i64
    }
}
