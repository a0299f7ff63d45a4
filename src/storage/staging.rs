//! Staging files awaiting upload
//!
//! Every batch is appended to the current staging file as it arrives, so
//! memory stays flat regardless of the upload interval or store outages.
//! The flush scheduler retires the current file and uploads retired files in
//! creation order; a file is deleted only after a successful upload.
//!
//! Files live in `<session dir>/staging/` and are named
//! `staging_<seq:06>_<YYYYmmddHHMMSS_fff>.csv`. Order comes from the sequence
//! number alone; the wall-clock part can step backwards.

use super::clock::{SampleClock, TIMESTAMP_FORMAT};
use super::remote::StagedRow;
use super::{create_csv_writer, write_samples};
use crate::error::{DaqError, Result};
use crate::types::SampleBatch;
use chrono::{Local, NaiveDateTime};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Subdirectory of the session directory holding staging files
pub const STAGING_DIR: &str = "staging";

const STAGING_PREFIX: &str = "staging_";
const STAGING_SUFFIX: &str = ".csv";

/// A retired staging file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingFile {
    pub path: PathBuf,
    pub rows: u64,
}

struct OpenStaging {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows: u64,
}

/// Appends batches to the current staging file
pub struct StagingWriter {
    dir: PathBuf,
    clock: SampleClock,
    seq: u64,
    current: Option<OpenStaging>,
}

impl StagingWriter {
    /// Create a writer under `<session_dir>/staging/`
    pub fn new(session_dir: &Path, clock: SampleClock) -> Result<Self> {
        let dir = staging_dir(session_dir);
        std::fs::create_dir_all(&dir).map_err(|e| {
            DaqError::Persistence(format!("Failed to create staging directory {:?}: {}", dir, e))
        })?;
        // Continue after files left by an earlier writer
        let seq = list_pending(&dir)?
            .iter()
            .filter_map(|path| staging_sequence(path))
            .max()
            .unwrap_or(0);
        Ok(Self {
            dir,
            clock,
            seq,
            current: None,
        })
    }

    /// Directory holding staging files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file currently being appended to
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }

    /// Append a batch, opening a new staging file if none is open
    pub fn append(&mut self, batch: &SampleBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.current.is_none() {
            self.current = Some(self.open_next()?);
        }
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };

        write_samples(&mut current.writer, &self.clock, batch.start_index, &batch.samples)
            .and_then(|_| current.writer.flush().map_err(DaqError::from))
            .map_err(|e| {
                DaqError::Persistence(format!("Failed to append to {:?}: {}", current.path, e))
            })?;
        current.rows += batch.len() as u64;
        Ok(())
    }

    /// Close the current file and hand it over for upload
    ///
    /// The next append starts a fresh file. Returns `None` when nothing was
    /// staged since the last rotation.
    pub fn rotate(&mut self) -> Result<Option<StagingFile>> {
        let Some(mut current) = self.current.take() else {
            return Ok(None);
        };
        current.writer.flush().map_err(|e| {
            DaqError::Persistence(format!("Failed to flush {:?}: {}", current.path, e))
        })?;
        drop(current.writer);

        tracing::debug!("Retired staging file {:?} ({} rows)", current.path, current.rows);
        Ok(Some(StagingFile {
            path: current.path,
            rows: current.rows,
        }))
    }

    fn open_next(&mut self) -> Result<OpenStaging> {
        self.seq += 1;
        let path = self.dir.join(staging_file_name(self.seq, Local::now().naive_local()));
        let writer = create_csv_writer(&path)?;
        tracing::debug!("Opened staging file {:?}", path);
        Ok(OpenStaging {
            writer,
            path,
            rows: 0,
        })
    }
}

/// Staging directory for a session
pub fn staging_dir(session_dir: &Path) -> PathBuf {
    session_dir.join(STAGING_DIR)
}

/// File name for the `seq`-th staging file created at `now`
pub fn staging_file_name(seq: u64, now: NaiveDateTime) -> String {
    format!(
        "{}{:06}_{}{}",
        STAGING_PREFIX,
        seq,
        now.format("%Y%m%d%H%M%S_%3f"),
        STAGING_SUFFIX
    )
}

/// Sequence number of a staging file, `None` for foreign names
pub fn staging_sequence(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(STAGING_PREFIX)?
        .split('_')
        .next()?
        .parse()
        .ok()
}

/// Staging files in `dir`, oldest first
///
/// A missing directory has no pending files.
pub fn list_pending(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(STAGING_PREFIX) && n.ends_with(STAGING_SUFFIX))
        })
        .collect();
    files.sort_by(|a, b| {
        let key = |p: &Path| staging_sequence(p).unwrap_or(u64::MAX);
        key(a).cmp(&key(b)).then_with(|| a.cmp(b))
    });
    Ok(files)
}

/// Parse a staging file back into rows
pub fn read_staged_rows(path: &Path) -> Result<Vec<StagedRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let row = parse_row(&record).ok_or_else(|| {
            DaqError::Upload(format!(
                "Malformed row {} in {:?}: {:?}",
                line + 2,
                path,
                record
            ))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Split a damaged staging file into the rows that parse and the raw
/// records that do not
///
/// Records the CSV reader cannot decode at all are logged and dropped.
pub fn salvage_staged_rows(path: &Path) -> Result<(Vec<StagedRow>, Vec<csv::StringRecord>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut rows = Vec::new();
    let mut torn = Vec::new();

    for record in reader.records() {
        match record {
            Ok(record) => match parse_row(&record) {
                Some(row) => rows.push(row),
                None => torn.push(record),
            },
            Err(e) => tracing::warn!("Undecodable record in {:?}: {}", path, e),
        }
    }
    Ok((rows, torn))
}

fn parse_row(record: &csv::StringRecord) -> Option<StagedRow> {
    if record.len() != 4 {
        return None;
    }
    let timestamp = NaiveDateTime::parse_from_str(&record[0], TIMESTAMP_FORMAT).ok()?;
    let channel = |i: usize| record[i].trim().parse::<f64>().ok();
    Some(StagedRow {
        timestamp,
        channel_1: channel(1)?,
        channel_2: channel(2)?,
        channel_3: channel(3)?,
    })
}
