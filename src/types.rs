//! Core data types shared across the acquisition pipeline
//!
//! Samples are always triplets; a [`SampleBatch`] therefore holds a whole
//! number of scalars by construction and can never carry a dangling partial
//! sample downstream.

use serde::{Deserialize, Serialize};

/// Number of channels delivered by the instrument (X, Y, Z)
pub const CHANNEL_COUNT: usize = 3;

/// Raw counts per physical unit for the instrument's 16-bit readings
pub const RAW_SCALE: f64 = 8192.0;

/// CSV header shared by rotated segments and staging files
pub const CSV_HEADER: [&str; 4] = ["Timestamp", "Channel_1(X)", "Channel_2(Y)", "Channel_3(Z)"];

/// One triaxial reading in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Sample {
    /// Create a sample from already-scaled values
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Build a sample from three raw register words
    ///
    /// Each word is reinterpreted as a two's-complement `i16` and divided by
    /// [`RAW_SCALE`].
    pub fn from_raw(words: [u16; 3]) -> Self {
        Self {
            x: scale_raw(words[0]),
            y: scale_raw(words[1]),
            z: scale_raw(words[2]),
        }
    }

    /// The three channel values in column order
    pub fn channels(&self) -> [f64; CHANNEL_COUNT] {
        [self.x, self.y, self.z]
    }
}

/// Convert one raw register word to a physical value
#[inline]
pub fn scale_raw(word: u16) -> f64 {
    (word as i16) as f64 / RAW_SCALE
}

/// Samples produced by one acquisition poll
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleBatch {
    /// Global triplet index of the first sample since session start
    pub start_index: u64,
    /// Samples in acquisition order
    pub samples: Vec<Sample>,
}

impl SampleBatch {
    /// Create a batch starting at the given global index
    pub fn new(start_index: u64, samples: Vec<Sample>) -> Self {
        Self {
            start_index,
            samples,
        }
    }

    /// Number of triplets in the batch
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of scalars (triplets × channels)
    pub fn scalar_len(&self) -> usize {
        self.samples.len() * CHANNEL_COUNT
    }

    /// Global index one past the last sample
    pub fn end_index(&self) -> u64 {
        self.start_index + self.samples.len() as u64
    }

    /// Flatten to `[x1, y1, z1, x2, ...]`
    pub fn flatten(&self) -> Vec<f64> {
        self.samples.iter().flat_map(|s| s.channels()).collect()
    }
}

/// Represents the connection status to the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionStatus {
    /// Not connected to the instrument
    #[default]
    Disconnected,
    /// Connected and ready
    Connected,
    /// The last transaction failed; a reconnect is pending
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Error => write!(f, "Error"),
        }
    }
}
