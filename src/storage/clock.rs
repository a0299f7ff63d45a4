//! Timestamp reconstruction
//!
//! The device does not timestamp samples. Each triplet's wall-clock time is
//! derived from the session start and its global index, so timestamps stay
//! continuous across segment boundaries and reconnects.

use chrono::{Duration, NaiveDateTime};

/// Format used for timestamps in CSV rows
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Maps a global triplet index to a wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleClock {
    start: NaiveDateTime,
    rate_hz: u32,
}

impl SampleClock {
    /// Create a clock for a session that started at `start`
    pub fn new(start: NaiveDateTime, rate_hz: u32) -> Self {
        Self {
            start,
            rate_hz: rate_hz.max(1),
        }
    }

    /// Session start time
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Sample rate in Hz
    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    /// Time of the triplet at `index`: `start + index / rate`
    pub fn timestamp(&self, index: u64) -> NaiveDateTime {
        let nanos = index as u128 * 1_000_000_000 / self.rate_hz as u128;
        self.start + Duration::nanoseconds(nanos.min(i64::MAX as u128) as i64)
    }

    /// Formatted time of the triplet at `index`
    pub fn format(&self, index: u64) -> String {
        self.timestamp(index).format(TIMESTAMP_FORMAT).to_string()
    }
}
