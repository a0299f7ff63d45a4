//! Rotating CSV segments
//!
//! Each segment holds exactly `segment_seconds × sample_rate × channels`
//! scalars. A batch that crosses the limit is split at a triplet boundary,
//! the head closes the current segment, and the tail goes to the next one.
//! A single batch may span several rotations.
//!
//! Segment files live in the session directory and are named
//! `<first-sample time %Y%m%d%H%M%S>_<label>_<index:03>.csv`.

use super::clock::SampleClock;
use super::{create_csv_writer, write_samples};
use crate::error::{DaqError, Result};
use crate::types::{Sample, SampleBatch};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Index of the first segment in a session
pub const FIRST_SEGMENT_INDEX: u32 = 1;

/// Description of one segment file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentInfo {
    /// 1-based position within the session
    pub index: u32,
    /// Global triplet index of the first row
    pub first_sample_index: u64,
    /// Reconstructed time of the first row
    pub first_timestamp: NaiveDateTime,
    /// Channels per row
    pub channel_count: usize,
    /// Path of the CSV file
    pub path: PathBuf,
}

/// Scalars per segment for the given settings
pub fn target_scalar_count(segment_seconds: u64, sample_rate_hz: u32, channel_count: usize) -> u64 {
    segment_seconds * sample_rate_hz as u64 * channel_count as u64
}

/// Writes batches into size-bounded CSV segments
pub struct FileRotator {
    session_dir: PathBuf,
    label: String,
    clock: SampleClock,
    channel_count: usize,
    target_scalars: u64,
    accumulated_scalars: u64,
    next_index: u32,
    writer: Option<csv::Writer<File>>,
    current: Option<SegmentInfo>,
    completed: u32,
}

impl FileRotator {
    /// Create a rotator; the first segment opens with the first batch
    pub fn new(
        session_dir: impl Into<PathBuf>,
        label: impl Into<String>,
        clock: SampleClock,
        segment_seconds: u64,
        channel_count: usize,
    ) -> Self {
        Self {
            session_dir: session_dir.into(),
            label: label.into(),
            target_scalars: target_scalar_count(segment_seconds, clock.rate_hz(), channel_count),
            clock,
            channel_count,
            accumulated_scalars: 0,
            next_index: FIRST_SEGMENT_INDEX,
            writer: None,
            current: None,
            completed: 0,
        }
    }

    /// Scalars per segment
    pub fn target_scalars(&self) -> u64 {
        self.target_scalars
    }

    /// Scalars written to the open segment
    pub fn accumulated_scalars(&self) -> u64 {
        self.accumulated_scalars
    }

    /// Segment currently open, if any
    pub fn current_segment(&self) -> Option<&SegmentInfo> {
        self.current.as_ref()
    }

    /// Number of segments closed so far
    pub fn completed_segments(&self) -> u32 {
        self.completed
    }

    /// Directory holding the segments
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Append a batch, rotating as often as needed
    ///
    /// Returns the segments closed while writing it.
    pub fn write_batch(&mut self, batch: &SampleBatch) -> Result<Vec<SegmentInfo>> {
        let mut closed = Vec::new();
        let samples = &batch.samples;
        let mut offset = 0;

        while offset < samples.len() {
            let index = batch.start_index + offset as u64;
            if self.writer.is_none() {
                self.open_segment(index)?;
            }

            let room = ((self.target_scalars - self.accumulated_scalars) / self.channel_count as u64)
                .max(1) as usize;
            let take = room.min(samples.len() - offset);
            self.append(&samples[offset..offset + take], index)?;
            self.accumulated_scalars += (take * self.channel_count) as u64;
            offset += take;

            if self.accumulated_scalars >= self.target_scalars {
                if let Some(info) = self.close_segment()? {
                    closed.push(info);
                }
                // The next segment opens as soon as the previous one is full
                self.open_segment(batch.start_index + offset as u64)?;
            }
        }

        Ok(closed)
    }

    /// Flush and close the open segment
    pub fn close(&mut self) -> Result<Option<SegmentInfo>> {
        self.close_segment()
    }

    fn open_segment(&mut self, first_sample_index: u64) -> Result<()> {
        std::fs::create_dir_all(&self.session_dir).map_err(|e| {
            DaqError::Persistence(format!(
                "Failed to create session directory {:?}: {}",
                self.session_dir, e
            ))
        })?;

        let first_timestamp = self.clock.timestamp(first_sample_index);
        let filename = format!(
            "{}_{}_{:03}.csv",
            first_timestamp.format("%Y%m%d%H%M%S"),
            self.label,
            self.next_index
        );
        let path = self.session_dir.join(filename);
        let writer = create_csv_writer(&path)?;

        tracing::info!("Opened segment {:?}", path);
        self.writer = Some(writer);
        self.current = Some(SegmentInfo {
            index: self.next_index,
            first_sample_index,
            first_timestamp,
            channel_count: self.channel_count,
            path,
        });
        self.next_index += 1;
        self.accumulated_scalars = 0;
        Ok(())
    }

    fn append(&mut self, samples: &[Sample], first_index: u64) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DaqError::Persistence("No segment is open".to_string()))?;
        write_samples(writer, &self.clock, first_index, samples)
            .and_then(|_| writer.flush().map_err(DaqError::from))
            .map_err(|e| DaqError::Persistence(format!("Failed to write segment: {}", e)))
    }

    fn close_segment(&mut self) -> Result<Option<SegmentInfo>> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(None);
        };
        let info = self.current.take();
        writer.flush().map_err(|e| {
            DaqError::Persistence(format!("Failed to flush segment {:?}: {}", info, e))
        })?;

        if let Some(ref info) = info {
            self.completed += 1;
            tracing::info!(
                "Closed segment {:03} ({} scalars)",
                info.index,
                self.accumulated_scalars
            );
        }
        self.accumulated_scalars = 0;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn clock(rate: u32) -> SampleClock {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        SampleClock::new(start, rate)
    }

    fn batch(start: u64, n: usize) -> SampleBatch {
        SampleBatch::new(
            start,
            (0..n)
                .map(|i| {
                    let v = (start + i as u64) as f64;
                    Sample::new(v, v, v)
                })
                .collect(),
        )
    }

    fn rows(path: &Path) -> Vec<csv::StringRecord> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_target_for_production_settings() {
        assert_eq!(target_scalar_count(600, 7812, 3), 14_061_600);
        assert_eq!(target_scalar_count(600, 7812, 3) / 3, 4_687_200);
    }

    #[test]
    fn test_single_segment_below_target() {
        let dir = tempfile::tempdir().unwrap();
        // 1 s at 10 Hz → 30 scalars per segment
        let mut rotator = FileRotator::new(dir.path(), "bench", clock(10), 1, 3);
        let closed = rotator.write_batch(&batch(0, 4)).unwrap();
        assert!(closed.is_empty());
        assert_eq!(rotator.accumulated_scalars(), 12);

        let info = rotator.close().unwrap().unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(
            info.path.file_name().unwrap().to_str().unwrap(),
            "20250301083000_bench_001.csv"
        );

        let records = rows(&info.path);
        assert_eq!(records.len(), 4);
        assert_eq!(&records[1][0], "2025-03-01T08:30:00.100000");
        assert_eq!(&records[3][1], "3");
    }

    #[test]
    fn test_header_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotator = FileRotator::new(dir.path(), "h", clock(10), 1, 3);
        rotator.write_batch(&batch(0, 1)).unwrap();
        let info = rotator.close().unwrap().unwrap();

        let mut reader = csv::Reader::from_path(&info.path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["Timestamp", "Channel_1(X)", "Channel_2(Y)", "Channel_3(Z)"]
        );
    }

    #[test]
    fn test_split_at_triplet_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotator = FileRotator::new(dir.path(), "split", clock(10), 1, 3);

        rotator.write_batch(&batch(0, 8)).unwrap();
        let closed = rotator.write_batch(&batch(8, 5)).unwrap();

        assert_eq!(closed.len(), 1);
        assert_eq!(rows(&closed[0].path).len(), 10);

        let current = rotator.current_segment().unwrap().clone();
        assert_eq!(current.index, 2);
        assert_eq!(current.first_sample_index, 10);
        assert_eq!(rotator.accumulated_scalars(), 9);

        let info = rotator.close().unwrap().unwrap();
        let records = rows(&info.path);
        assert_eq!(&records[0][1], "10");
        // Timestamps continue across the boundary
        assert_eq!(&records[0][0], "2025-03-01T08:30:01.000000");
    }

    #[test]
    fn test_batch_spanning_several_rotations() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotator = FileRotator::new(dir.path(), "span", clock(10), 1, 3);

        let closed = rotator.write_batch(&batch(0, 35)).unwrap();
        assert_eq!(closed.len(), 3);
        assert_eq!(
            closed.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for info in &closed {
            assert_eq!(rows(&info.path).len(), 10);
        }
        assert_eq!(rotator.accumulated_scalars(), 15);
        assert_eq!(rotator.completed_segments(), 3);
    }

    #[test]
    fn test_exact_fill_opens_next_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotator = FileRotator::new(dir.path(), "exact", clock(10), 1, 3);

        let closed = rotator.write_batch(&batch(0, 10)).unwrap();
        assert_eq!(closed.len(), 1);

        let next = rotator.current_segment().unwrap();
        assert_eq!(next.index, 2);
        assert_eq!(next.first_sample_index, 10);
        assert!(next.path.exists());
        assert_eq!(rotator.accumulated_scalars(), 0);
    }

    #[test]
    #[ignore = "writes a full 600 s segment at 7812 Hz"]
    fn test_production_segment_exact_fill() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotator = FileRotator::new(dir.path(), "prod", clock(7812), 600, 3);

        // One second of samples per batch
        let mut closed = Vec::new();
        for second in 0..600u64 {
            closed.extend(rotator.write_batch(&batch(second * 7812, 7812)).unwrap());
        }

        assert_eq!(closed.len(), 1);
        assert_eq!(rows(&closed[0].path).len(), 4_687_200);

        let next = rotator.current_segment().unwrap().clone();
        assert_eq!(next.index, 2);
        assert_eq!(next.first_sample_index, 4_687_200);
        assert_eq!(rotator.accumulated_scalars(), 0);
        let last = rotator.close().unwrap().unwrap();
        assert!(rows(&last.path).is_empty());
    }

    #[test]
    fn test_unwritable_directory_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let mut rotator = FileRotator::new(blocker.join("session"), "x", clock(10), 1, 3);
        let err = rotator.write_batch(&batch(0, 1)).unwrap_err();
        assert!(err.is_fatal());
    }
}
