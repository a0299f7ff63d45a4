//! Shared session state
//!
//! One mutex guards every field the threads share. Writers hold the lock only
//! to copy or swap fields; readers take a [`SessionState`] snapshot and never
//! see a half-applied update.

use crate::storage::rotator::SegmentInfo;
use crate::types::ConnectionStatus;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Observable state of the current (or last) session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    /// Whether a session is collecting
    pub is_collecting: bool,
    /// Batches pushed into the acquisition queue since start
    pub batch_counter: u64,
    /// Sample rate confirmed by the device
    pub sample_rate_hz: u32,
    /// Channels per sample
    pub channel_count: usize,
    /// State of the instrument link as seen by the acquisition thread
    pub link: ConnectionStatus,
    /// Share of successful bus transactions, in percent
    pub bus_success_rate: f64,
    /// Average time of recent bus transactions in microseconds
    pub bus_avg_read_us: f64,
    /// Session label, sanitised for file names
    pub label: Option<String>,
    /// Session output directory
    pub session_dir: Option<PathBuf>,
    /// Wall-clock time of the first sample
    pub started_at: Option<NaiveDateTime>,
    /// Segment currently being written
    pub current_segment: Option<SegmentInfo>,
    /// Staging file currently being appended to
    pub current_staging: Option<PathBuf>,
    /// Triplets persisted to segments
    pub samples_written: u64,
    /// Staging files waiting for upload
    pub pending_uploads: usize,
    /// Last fatal error, cleared on the next start
    pub last_error: Option<String>,
}

/// Thread-safe wrapper around [`SessionState`]
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<SessionState>,
}

impl SharedState {
    /// Create an idle state
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy of the whole state
    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    /// Apply a short update under the lock
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionState),
    {
        f(&mut self.lock());
    }

    /// Whether a session is collecting
    pub fn is_collecting(&self) -> bool {
        self.lock().is_collecting
    }

    /// Current batch counter
    pub fn batch_counter(&self) -> u64 {
        self.lock().batch_counter
    }

    /// Count one more batch handed to the queue
    pub fn increment_batch_counter(&self) -> u64 {
        let mut state = self.lock();
        state.batch_counter += 1;
        state.batch_counter
    }

    /// Claim the collecting flag; `false` if a session is already active
    pub fn try_begin(&self) -> bool {
        let mut state = self.lock();
        if state.is_collecting {
            return false;
        }
        *state = SessionState {
            is_collecting: true,
            ..Default::default()
        };
        true
    }

    /// Record a fatal error and stop reporting the session as collecting
    pub fn record_fatal(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.last_error = Some(message.into());
        state.is_collecting = false;
    }

    /// Last fatal error, if any
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Mark the session as no longer collecting
    pub fn finish(&self) {
        let mut state = self.lock();
        state.is_collecting = false;
        state.current_staging = None;
        state.link = ConnectionStatus::Disconnected;
    }
}
