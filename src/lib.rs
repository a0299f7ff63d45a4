//! # vibdaq-rs: triaxial vibration acquisition over Modbus-RTU
//!
//! Pulls X/Y/Z vibration samples from a field instrument over a half-duplex
//! serial bus, rebuilds a channel-aligned sample stream, writes it to
//! rotating CSV files with reconstructed timestamps and uploads it to MySQL
//! through staging files.
//!
//! ## Architecture
//!
//! - **Backend**: register protocol, read-mode selection, frame reassembly
//!   and the acquisition thread
//! - **Pipeline**: bounded queue, distribution hub and live-view window
//! - **Storage**: file rotation, staging files, uploader and flush scheduler
//! - **Session**: lifecycle controller, shared state and the collaborator API
//! - **Communication**: crossbeam channels between the three worker threads
//!
//! ## Configuration
//!
//! Settings are read from TOML, by default from the platform configuration
//! directory under `vibdaq-rs/config.toml`:
//!
//! - **Linux**: `~/.config/vibdaq-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/vibdaq-rs/config.toml`
//! - **Windows**: `%APPDATA%\vibdaq-rs\config.toml`
//!
//! ## Example
//!
//! ```ignore
//! use vibdaq_rs::{config::{DaqConfig, UploadOverrides}, SessionController};
//!
//! let config = DaqConfig::load_or_default("config.toml");
//! let mut controller = SessionController::new(config);
//! controller.start_session("pump-a", &UploadOverrides::default())?;
//! std::thread::sleep(std::time::Duration::from_secs(60));
//! controller.stop_session()?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::{DaqConfig, UploadOverrides};
pub use error::{DaqError, Result};
pub use session::{LatestSamples, SessionController, SessionState};
pub use types::{Sample, SampleBatch};
