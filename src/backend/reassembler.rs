//! Frame reassembly
//!
//! Raw reads do not have to end on a triplet boundary. The reassembler keeps
//! the 0..=2 leftover words of one read and prepends them to the next, so
//! every emitted [`SampleBatch`] contains only complete triplets in device
//! order.

use crate::types::{Sample, SampleBatch, CHANNEL_COUNT};
use std::sync::Mutex;

/// Carries partial triplets across read cycles
///
/// The remainder sits behind a mutex because the reset path (reconnect or
/// stop) can run from a different thread than the acquisition loop.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    remainder: Mutex<Vec<u16>>,
}

impl FrameReassembler {
    /// Create a reassembler with an empty remainder
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw read and return the complete triplets it closes
    ///
    /// `start_index` is the global triplet index the first emitted sample
    /// receives.
    pub fn push(&self, raw: &[u16], start_index: u64) -> SampleBatch {
        let words = {
            let mut remainder = self.lock();
            let mut words = std::mem::take(&mut *remainder);
            words.extend_from_slice(raw);

            let complete = words.len() - words.len() % CHANNEL_COUNT;
            remainder.extend_from_slice(&words[complete..]);
            words.truncate(complete);
            words
        };

        let samples = words
            .chunks_exact(CHANNEL_COUNT)
            .map(|w| Sample::from_raw([w[0], w[1], w[2]]))
            .collect();
        SampleBatch::new(start_index, samples)
    }

    /// Drop any carried words; returns how many were discarded
    pub fn reset(&self) -> usize {
        let mut remainder = self.lock();
        let dropped = remainder.len();
        remainder.clear();
        dropped
    }

    /// Number of words currently carried
    pub fn pending_words(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u16>> {
        // A poisoned remainder holds at most two words; keep going with it
        self.remainder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
