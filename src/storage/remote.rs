//! Remote store seam
//!
//! [`RemoteStore`] isolates the database client so that the uploader and the
//! flush scheduler can be exercised against a mock.

use crate::config::UploadConfig;
use crate::error::Result;
use chrono::NaiveDateTime;
use std::time::Duration;

/// Table used when no usable name can be derived
pub const FALLBACK_TABLE: &str = "vibration_data";

/// One staged triplet ready for insertion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagedRow {
    pub timestamp: NaiveDateTime,
    pub channel_1: f64,
    pub channel_2: f64,
    pub channel_3: f64,
}

/// Connection parameters and destination table, resolved once per session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
    /// Bound on connect, read and write
    pub timeout: Duration,
}

impl UploadTarget {
    /// Resolve the target from upload settings
    ///
    /// An empty configured table falls back to `default_table` (normally the
    /// session directory name). The result is always a safe identifier.
    pub fn resolve(config: &UploadConfig, default_table: &str) -> Self {
        let table = if config.table.trim().is_empty() {
            default_table
        } else {
            config.table.as_str()
        };
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            table: sanitize_table_name(table),
            timeout: config.timeout(),
        }
    }

    /// `user@host:port/database.table`, without the password
    pub fn describe(&self) -> String {
        format!(
            "{}@{}:{}/{}.{}",
            self.user, self.host, self.port, self.database, self.table
        )
    }
}

/// Make a string safe to use as an unquoted SQL identifier
///
/// Anything outside `[A-Za-z0-9_]` becomes `_`; a leading digit gets a `t_`
/// prefix; an empty result falls back to [`FALLBACK_TABLE`].
pub fn sanitize_table_name(name: &str) -> String {
    let mut sanitized: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if sanitized.trim_matches('_').is_empty() {
        return FALLBACK_TABLE.to_string();
    }
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert_str(0, "t_");
    }
    sanitized
}

/// Interface to the relational store receiving staged samples
#[cfg_attr(test, mockall::automock)]
pub trait RemoteStore: Send {
    /// Open a connection; replaces any existing one
    fn connect(&mut self) -> Result<()>;

    /// Whether a connection is open
    fn is_connected(&self) -> bool;

    /// Drop the connection
    fn disconnect(&mut self);

    /// Create the destination table if it does not exist
    fn ensure_table(&mut self, table: &str) -> Result<()>;

    /// Insert rows in one transaction
    fn insert_rows(&mut self, table: &str, label: &str, rows: &[StagedRow]) -> Result<()>;
}
