//! Configuration module for vibdaq-rs
//!
//! Configuration is a typed TOML document with three sections:
//!
//! - `[device]` - serial link and acquisition settings
//! - `[storage]` - output directory, segment length, live-view window
//! - `[upload]` - remote store target and flush interval
//!
//! Every field has a default, so an empty file is valid. [`DaqConfig::validate`]
//! runs when a session starts; invalid values fail the start immediately
//! instead of surfacing later at the point of use.
//!
//! # Location
//!
//! The default file is `config.toml` in the platform configuration directory:
//!
//! - **Linux**: `~/.config/vibdaq-rs/`
//! - **macOS**: `~/Library/Application Support/vibdaq-rs/`
//! - **Windows**: `%APPDATA%\vibdaq-rs\`
//!
//! # Example
//!
//! ```toml
//! [device]
//! serial_port = "/dev/ttyUSB0"
//! baud_rate = 3000000
//! sample_rate_hz = 7812
//!
//! [storage]
//! segment_seconds = 600
//!
//! [upload]
//! enabled = true
//! host = "db.local"
//! interval_seconds = 60
//! ```

use crate::error::{DaqError, Result};
use crate::types::CHANNEL_COUNT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for configuration directories
pub const APP_ID: &str = "vibdaq-rs";

/// Configuration filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default serial port
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate of the instrument
pub const DEFAULT_BAUD_RATE: u32 = 3_000_000;

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 7812;

/// Default segment length in seconds
pub const DEFAULT_SEGMENT_SECONDS: u64 = 600;

/// Default upload interval in seconds
pub const DEFAULT_UPLOAD_INTERVAL_SECONDS: u64 = 600;

/// Default capacity of the acquisition queue (batches)
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

// ==================== Config Location ====================

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path of the default configuration file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Top-level Config ====================

/// Complete configuration consumed by a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Serial link and acquisition settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Local persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote store settings
    #[serde(default)]
    pub upload: UploadConfig,
}

impl DaqConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DaqError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DaqError::Config(format!("Failed to read configuration {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the configuration, returning defaults if the file is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No configuration at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load configuration, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DaqError::Config(format!("Failed to create configuration directory: {}", e))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DaqError::Config(format!("Failed to serialize configuration: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| DaqError::Config(format!("Failed to write configuration {:?}: {}", path, e)))
    }

    /// Check every field; the first invalid one is reported
    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.storage.validate()?;
        self.upload.validate()
    }
}

// ==================== Device Config ====================

/// Serial link and acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path (e.g. `/dev/ttyUSB0`)
    pub serial_port: String,

    /// Baud rate
    pub baud_rate: u32,

    /// Modbus slave id of the instrument
    pub slave_id: u8,

    /// Sample rate written to the instrument at init
    pub sample_rate_hz: u32,

    /// Channels per sample; the instrument is fixed at 3
    pub channel_count: usize,

    /// Per-transaction response timeout in milliseconds
    pub response_timeout_ms: u64,

    /// Bound on the identification probe at connect, in milliseconds
    pub probe_timeout_ms: u64,

    /// Time budget for draining a bulk backlog within one poll, in milliseconds
    pub poll_budget_ms: u64,

    /// Capacity of the acquisition queue in batches
    pub queue_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial_port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            slave_id: 1,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            channel_count: CHANNEL_COUNT,
            response_timeout_ms: 1000,
            probe_timeout_ms: 500,
            poll_budget_ms: 50,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DeviceConfig {
    /// Per-transaction response timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Identification probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Bulk drain budget for one poll
    pub fn poll_budget(&self) -> Duration {
        Duration::from_millis(self.poll_budget_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.serial_port.trim().is_empty() {
            return Err(DaqError::Config("device.serial_port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(DaqError::Config("device.baud_rate must be positive".into()));
        }
        if !(1..=247).contains(&self.slave_id) {
            return Err(DaqError::Config(format!(
                "device.slave_id {} is outside 1..=247",
                self.slave_id
            )));
        }
        if self.sample_rate_hz == 0 || self.sample_rate_hz > u16::MAX as u32 {
            return Err(DaqError::Config(format!(
                "device.sample_rate_hz {} must fit the 16-bit rate register",
                self.sample_rate_hz
            )));
        }
        if self.channel_count != CHANNEL_COUNT {
            return Err(DaqError::Config(format!(
                "device.channel_count must be {} (got {})",
                CHANNEL_COUNT, self.channel_count
            )));
        }
        if self.queue_capacity == 0 {
            return Err(DaqError::Config("device.queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

// ==================== Storage Config ====================

/// Local persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for session folders
    pub output_dir: PathBuf,

    /// Target duration of one CSV segment in seconds
    pub segment_seconds: u64,

    /// Number of most recent triplets kept for the live viewer
    pub live_view_samples: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            segment_seconds: DEFAULT_SEGMENT_SECONDS,
            live_view_samples: DEFAULT_SAMPLE_RATE_HZ as usize,
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.segment_seconds == 0 {
            return Err(DaqError::Config("storage.segment_seconds must be positive".into()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(DaqError::Config("storage.output_dir must not be empty".into()));
        }
        Ok(())
    }
}

// ==================== Upload Config ====================

/// Remote store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Whether staged samples are uploaded at all
    pub enabled: bool,

    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Database (schema) name
    pub database: String,

    /// Destination table; empty means "derive from the session folder name"
    pub table: String,

    /// Seconds between scheduled flushes
    pub interval_seconds: u64,

    /// Bound on each connect, read and write against the store, in seconds
    pub timeout_seconds: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "vibdaq".to_string(),
            table: String::new(),
            interval_seconds: DEFAULT_UPLOAD_INTERVAL_SECONDS,
            timeout_seconds: 10,
        }
    }
}

impl UploadConfig {
    /// Interval between scheduled flushes
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Bound on individual remote operations
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_seconds == 0 {
            return Err(DaqError::Config("upload.interval_seconds must be positive".into()));
        }
        if !self.enabled {
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(DaqError::Config("upload.host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(DaqError::Config("upload.port must be positive".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(DaqError::Config("upload.timeout_seconds must be positive".into()));
        }
        Ok(())
    }

    /// Apply caller-supplied overrides
    ///
    /// Overrides only take effect when `enabled` is supplied; an enabled
    /// override replaces every connection field it carries, falling back to
    /// the file value for the fields it leaves out.
    pub fn with_overrides(&self, overrides: &UploadOverrides) -> Self {
        let mut merged = self.clone();
        let Some(enabled) = overrides.enabled else {
            return merged;
        };
        merged.enabled = enabled;
        if !enabled {
            return merged;
        }
        if let Some(ref host) = overrides.host {
            merged.host = host.clone();
        }
        if let Some(port) = overrides.port {
            merged.port = port;
        }
        if let Some(ref user) = overrides.user {
            merged.user = user.clone();
        }
        if let Some(ref password) = overrides.password {
            merged.password = password.clone();
        }
        if let Some(ref database) = overrides.database {
            merged.database = database.clone();
        }
        merged
    }
}

/// Upload settings supplied by the caller of `start_session`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadOverrides {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

// ==================== Tests ====================
