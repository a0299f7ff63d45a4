//! Live-view buffer for the viewer collaborator.
//!
//! Keeps a bounded window of the most recent triplets. The window is only
//! fed while a viewer is polling: when nobody asked for data within
//! [`LIVE_VIEW_IDLE_TIMEOUT`], incoming batches are skipped.

use crate::types::{Sample, SampleBatch};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A viewer that has not polled for this long is considered gone
pub const LIVE_VIEW_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct LiveInner {
    window: VecDeque<Sample>,
    last_request: Option<Instant>,
}

/// Bounded window of recent samples
#[derive(Debug)]
pub struct LiveView {
    inner: Mutex<LiveInner>,
    capacity: usize,
    idle_timeout: Duration,
}

impl LiveView {
    /// Create a window holding at most `capacity` triplets
    pub fn new(capacity: usize) -> Self {
        Self::with_idle_timeout(capacity, LIVE_VIEW_IDLE_TIMEOUT)
    }

    /// Create a window with a custom viewer timeout
    pub fn with_idle_timeout(capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(LiveInner {
                window: VecDeque::with_capacity(capacity.min(1 << 16)),
                last_request: None,
            }),
            capacity: capacity.max(1),
            idle_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LiveInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Maximum triplets kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a viewer polled recently
    pub fn is_viewer_active(&self) -> bool {
        let inner = self.lock();
        self.is_active(&inner)
    }

    fn is_active(&self, inner: &LiveInner) -> bool {
        inner
            .last_request
            .is_some_and(|t| t.elapsed() < self.idle_timeout)
    }

    /// Append a batch if a viewer is active; returns whether it was kept
    pub fn offer(&self, batch: &SampleBatch) -> bool {
        let mut inner = self.lock();
        if !self.is_active(&inner) {
            return false;
        }

        let incoming = &batch.samples;
        let keep = incoming.len().min(self.capacity);
        let overflow = (inner.window.len() + keep).saturating_sub(self.capacity);
        inner.window.drain(..overflow);
        inner
            .window
            .extend(incoming[incoming.len() - keep..].iter().copied());
        true
    }

    /// Register a viewer request and return the window as `[x1, y1, z1, ...]`
    pub fn latest(&self) -> Vec<f64> {
        let mut inner = self.lock();
        inner.last_request = Some(Instant::now());
        inner.window.iter().flat_map(|s| s.channels()).collect()
    }

    /// Triplets currently held
    pub fn len(&self) -> usize {
        self.lock().window.len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.lock().window.is_empty()
    }

    /// Drop all samples and forget the viewer
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.window.clear();
        inner.last_request = None;
    }
}
