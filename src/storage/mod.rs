//! Local and remote persistence
//!
//! - [`rotator`] writes the primary record as size-bounded CSV segments
//! - [`staging`] buffers samples on disk until they are uploaded
//! - [`uploader`] and [`scheduler`] move staged files to the remote store
//!   behind the [`remote::RemoteStore`] trait

pub mod clock;
pub mod mysql_store;
pub mod remote;
pub mod rotator;
pub mod scheduler;
pub mod staging;
pub mod uploader;

pub use clock::SampleClock;
pub use mysql_store::MySqlStore;
pub use remote::{RemoteStore, StagedRow, UploadTarget};
pub use rotator::{FileRotator, SegmentInfo};
pub use scheduler::FlushScheduler;
pub use staging::{StagingFile, StagingWriter};
pub use uploader::Uploader;

use crate::error::{DaqError, Result};
use crate::types::{Sample, CSV_HEADER};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Create a CSV file and write the sample header
pub(crate) fn create_csv_writer(path: &Path) -> Result<csv::Writer<File>> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| DaqError::Persistence(format!("Failed to create {:?}: {}", path, e)))?;
    writer
        .write_record(CSV_HEADER)
        .and_then(|_| writer.flush().map_err(csv::Error::from))
        .map_err(|e| DaqError::Persistence(format!("Failed to write header to {:?}: {}", path, e)))?;
    Ok(writer)
}

/// Append one row per sample, timestamped from the clock
pub(crate) fn write_samples<W: Write>(
    writer: &mut csv::Writer<W>,
    clock: &SampleClock,
    first_index: u64,
    samples: &[Sample],
) -> Result<()> {
    for (offset, sample) in samples.iter().enumerate() {
        writer.write_record([
            clock.format(first_index + offset as u64),
            sample.x.to_string(),
            sample.y.to_string(),
            sample.z.to_string(),
        ])?;
    }
    Ok(())
}
