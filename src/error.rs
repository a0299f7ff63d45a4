//! Error handling for vibdaq-rs
//!
//! This module defines the crate-wide error type and a Result alias. The
//! variants follow the failure taxonomy of the acquisition pipeline: device
//! faults are transient and recovered inside the register client, persistence
//! faults are fatal to a session, upload faults are retried and deferred.

use thiserror::Error;

/// Main error type for vibdaq-rs operations
#[derive(Error, Debug)]
pub enum DaqError {
    /// The serial link could not be opened or the device did not answer
    #[error("Connection error: {0}")]
    Connection(String),

    /// A register transaction failed (timeout, exception code, malformed frame)
    #[error("Device error: {0}")]
    Device(String),

    /// Errors related to configuration loading or validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// The local primary record could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The remote store rejected a connection or insert
    #[error("Upload error: {0}")]
    Upload(String),

    /// A session is already collecting
    #[error("A collection session is already running")]
    AlreadyRunning,

    /// Errors related to channel communication between workers
    #[error("Channel error: {0}")]
    Channel(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding/decoding errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DaqError>,
    },
}

impl DaqError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DaqError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error must stop the running session
    pub fn is_fatal(&self) -> bool {
        match self {
            DaqError::Persistence(_) => true,
            DaqError::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Result type alias for vibdaq-rs operations
pub type Result<T> = std::result::Result<T, DaqError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
