//! Staging-file uploader
//!
//! Moves retired staging files into the remote store. Each file gets up to
//! three attempts with linear backoff; a file is deleted only after every row
//! is committed. A failed file stays on disk untouched and is picked up by
//! the next flush, which gives at-least-once delivery.
//!
//! A file with a torn row still delivers the rows that parse; the broken
//! records are copied to a `.rejected` file beside it.

use super::remote::{RemoteStore, StagedRow};
use super::staging::{list_pending, read_staged_rows, salvage_staged_rows, staging_sequence};
use crate::backend::retry::RetryPolicy;
use crate::error::{Result, ResultExt};
use crate::types::CSV_HEADER;
use std::path::{Path, PathBuf};

/// Rows per insert transaction
pub const INSERT_CHUNK_ROWS: usize = 1000;

/// Extension given to staging files (or rows of them) that cannot be parsed
pub const REJECTED_EXTENSION: &str = "rejected";

/// Outcome of one pass over the staging directory
#[derive(Debug, Default, PartialEq)]
pub struct FlushReport {
    /// Files uploaded and deleted
    pub uploaded_files: usize,
    /// Rows committed
    pub uploaded_rows: u64,
    /// Files left for a later flush
    pub remaining_files: usize,
    /// Error that ended the pass early
    pub error: Option<String>,
}

/// Uploads staging files through a [`RemoteStore`]
pub struct Uploader {
    store: Box<dyn RemoteStore>,
    table: String,
    label: String,
    retry: RetryPolicy,
    table_ready: bool,
}

impl Uploader {
    /// Create an uploader writing rows tagged with `label` into `table`
    pub fn new(store: Box<dyn RemoteStore>, table: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            label: label.into(),
            retry: RetryPolicy::default(),
            table_ready: false,
        }
    }

    /// Use a different retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Destination table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Upload one staging file and delete it on success
    ///
    /// Returns the number of rows committed.
    pub fn upload_file(&mut self, path: &Path) -> Result<u64> {
        let rows = load(path)?;
        self.upload_rows(path, &rows)
    }

    fn upload_rows(&mut self, path: &Path, rows: &[StagedRow]) -> Result<u64> {
        if rows.is_empty() {
            remove_staging(path);
            return Ok(0);
        }

        let retry = self.retry;
        let mut committed = 0usize;
        retry.run(&format!("Upload of {:?}", file_name(path)), |_attempt| {
            if !self.store.is_connected() {
                self.table_ready = false;
                self.store.connect()?;
            }
            if !self.table_ready {
                self.store.ensure_table(&self.table)?;
                self.table_ready = true;
            }
            // Chunks committed by an earlier attempt are not sent again
            for chunk in rows[committed..].chunks(INSERT_CHUNK_ROWS) {
                self.store.insert_rows(&self.table, &self.label, chunk)?;
                committed += chunk.len();
            }
            Ok(())
        })?;

        remove_staging(path);
        tracing::info!(
            "Uploaded {} rows from {:?} to {}",
            rows.len(),
            file_name(path),
            self.table
        );
        Ok(rows.len() as u64)
    }

    /// Upload every pending staging file in `dir`, oldest first
    ///
    /// Stops at the first file that still fails after its retries; that file
    /// and every later one remain for the next pass. Unparseable files are
    /// set aside so they cannot block the queue.
    pub fn flush_pending(&mut self, dir: &Path) -> FlushReport {
        self.flush_pending_until(dir, None, None)
    }

    /// Like [`Uploader::flush_pending`], but only files created no later
    /// than `last`, and never `open`
    ///
    /// Used while the hub may still be appending to a newer staging file.
    pub fn flush_pending_until(
        &mut self,
        dir: &Path,
        last: Option<&Path>,
        open: Option<&Path>,
    ) -> FlushReport {
        let mut report = FlushReport::default();
        let files: Vec<PathBuf> = match list_pending(dir) {
            Ok(files) => files
                .into_iter()
                .filter(|f| open.map_or(true, |open| f.as_path() != open))
                .filter(|f| last.map_or(true, |last| created_no_later(f, last)))
                .collect(),
            Err(e) => {
                report.error = Some(format!("Failed to list staging files: {}", e));
                return report;
            }
        };

        for (i, path) in files.iter().enumerate() {
            let rows = match load(path) {
                Ok(rows) => rows,
                Err(e) => match salvage(path) {
                    Some(rows) => {
                        tracing::warn!("Uploading {} intact rows: {}", rows.len(), e);
                        rows
                    }
                    None => {
                        tracing::error!("Setting aside unreadable staging file: {}", e);
                        reject(path);
                        continue;
                    }
                },
            };
            match self.upload_rows(path, &rows) {
                Ok(count) => {
                    report.uploaded_files += 1;
                    report.uploaded_rows += count;
                }
                Err(e) => {
                    tracing::warn!("Upload deferred to the next flush: {}", e);
                    report.remaining_files = files.len() - i;
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }
        report
    }

    /// Close the connection to the store
    pub fn disconnect(&mut self) {
        self.store.disconnect();
        self.table_ready = false;
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn remove_staging(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("Failed to delete uploaded staging file {:?}: {}", path, e);
    }
}

fn load(path: &Path) -> Result<Vec<StagedRow>> {
    read_staged_rows(path).with_context(|| format!("Reading {:?}", path))
}

fn created_no_later(file: &Path, last: &Path) -> bool {
    match (staging_sequence(file), staging_sequence(last)) {
        (Some(seq), Some(last_seq)) => seq <= last_seq,
        _ => file <= last,
    }
}

/// Rows of a damaged file that still parse; broken records go to the
/// `.rejected` file. `None` when nothing is worth uploading.
fn salvage(path: &Path) -> Option<Vec<StagedRow>> {
    let (rows, torn) = match salvage_staged_rows(path) {
        Ok(split) => split,
        Err(e) => {
            tracing::warn!("Failed to salvage {:?}: {}", path, e);
            return None;
        }
    };
    if rows.is_empty() {
        return None;
    }
    if !torn.is_empty() {
        let rejected = path.with_extension(REJECTED_EXTENSION);
        if let Err(e) = write_records(&rejected, &torn) {
            tracing::warn!("Failed to set aside malformed rows of {:?}: {}", path, e);
            return None;
        }
        tracing::warn!("Set aside {} malformed rows in {:?}", torn.len(), rejected);
    }
    Some(rows)
}

fn write_records(path: &Path, records: &[csv::StringRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn reject(path: &Path) {
    let rejected: PathBuf = path.with_extension(REJECTED_EXTENSION);
    if let Err(e) = std::fs::rename(path, &rejected) {
        tracing::warn!("Failed to set aside {:?}: {}", path, e);
    }
}
