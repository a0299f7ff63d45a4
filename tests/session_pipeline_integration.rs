//! Integration tests for the session pipeline
//!
//! These tests drive a whole session against the simulated instrument:
//! - Ordered, channel-aligned segments with reconstructed timestamps
//! - Staging files and the final flush on stop
//! - Upload failures leaving staging files for a later flush

mod common;

use common::builders::{counter_words, ConfigBuilder};
use common::mock_helpers::{mock_controller, RecordingStore};
use common::{assert_float_eq, read_rows, segment_files, wait_until};
use std::collections::HashSet;
use vibdaq_rs::backend::{MockDevice, MockWaveform};
use vibdaq_rs::config::UploadOverrides;
use vibdaq_rs::storage::staging::{list_pending, staging_dir};
use vibdaq_rs::storage::Uploader;
use vibdaq_rs::types::scale_raw;

#[test]
fn test_segments_hold_every_sample_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let device = MockDevice::new();
    let handle = device.handle();
    // Large enough to go through Bulk reads several times
    handle.push_words(&counter_words(1000));

    let store = RecordingStore::new();
    let config = ConfigBuilder::new(dir.path()).sample_rate(100).build();
    let mut controller = mock_controller(config, &handle, &store);

    controller.start_session("order", &UploadOverrides::default()).unwrap();
    wait_until("all samples persisted", || {
        controller.status().samples_written == 1000
    });
    let session_dir = controller.session_dir().unwrap();
    controller.stop_session().unwrap();

    let files = segment_files(&session_dir);
    // 100 triplets per segment; the last exact fill opens one empty segment
    assert_eq!(files.len(), 11);

    let rows: Vec<_> = files.iter().flat_map(|f| read_rows(f)).collect();
    assert_eq!(rows.len(), 1000);
    for (n, (_, x, y, z)) in rows.iter().enumerate() {
        let base = (n * 3) as u16;
        assert_float_eq(*x, scale_raw(base), 1e-12);
        assert_float_eq(*y, scale_raw(base + 1), 1e-12);
        assert_float_eq(*z, scale_raw(base + 2), 1e-12);
    }

    // Timestamps are strictly increasing across segment boundaries
    for pair in rows.windows(2) {
        assert!(pair[0].0 < pair[1].0, "{} !< {}", pair[0].0, pair[1].0);
    }
    assert!(store.log().rows.is_empty());
}

#[test]
fn test_stop_uploads_buffered_rows_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let device = MockDevice::new();
    let handle = device.handle();
    handle.push_words(&counter_words(500));

    let store = RecordingStore::new();
    let config = ConfigBuilder::new(dir.path()).upload_enabled().build();
    let mut controller = mock_controller(config, &handle, &store);

    controller.start_session("once", &UploadOverrides::default()).unwrap();
    wait_until("samples persisted", || controller.status().samples_written == 500);
    let session_dir = controller.session_dir().unwrap();
    controller.stop_session().unwrap();

    let log = store.log();
    assert_eq!(log.inserts, 1);
    assert_eq!(log.rows.len(), 500);
    assert!(log.rows.iter().all(|(label, _)| label == "once"));
    assert!(log.tables[0].ends_with("_once"));
    drop(log);

    assert!(list_pending(&staging_dir(&session_dir)).unwrap().is_empty());
}

#[test]
fn test_failed_uploads_keep_file_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let device = MockDevice::new();
    let handle = device.handle();
    handle.push_words(&counter_words(300));

    let store = RecordingStore::new();
    // Every attempt of the final flush is refused
    store.refuse_connects(3);
    let config = ConfigBuilder::new(dir.path()).upload_enabled().build();
    let mut controller = mock_controller(config, &handle, &store);

    controller.start_session("retry", &UploadOverrides::default()).unwrap();
    wait_until("samples persisted", || controller.status().samples_written == 300);
    let session_dir = controller.session_dir().unwrap();

    // Upload failures never fail the session
    controller.stop_session().unwrap();
    assert_eq!(controller.status().pending_uploads, 1);

    let staging = staging_dir(&session_dir);
    let pending = list_pending(&staging).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(read_rows(&pending[0]).len(), 300);
    assert!(store.log().rows.is_empty());

    // The next flush picks the file up
    let mut uploader = Uploader::new(Box::new(store.share()), "retry_table", "retry");
    let report = uploader.flush_pending(&staging);
    assert_eq!(report.uploaded_files, 1);
    assert_eq!(report.uploaded_rows, 300);
    assert!(list_pending(&staging).unwrap().is_empty());

    let log = store.log();
    let unique: HashSet<_> = log.rows.iter().map(|(_, r)| r.timestamp).collect();
    assert_eq!(log.rows.len(), 300);
    assert_eq!(unique.len(), 300);
}

#[test]
fn test_scheduled_flush_while_collecting() {
    let dir = tempfile::tempdir().unwrap();
    let device = MockDevice::new().with_generator(MockWaveform::Counter);
    let handle = device.handle();

    let store = RecordingStore::new();
    let config = ConfigBuilder::new(dir.path())
        .sample_rate(500)
        .upload_enabled()
        .upload_interval(1)
        .build();
    let mut controller = mock_controller(config, &handle, &store);

    controller.start_session("live", &UploadOverrides::default()).unwrap();
    wait_until("a scheduled upload", || !store.log().rows.is_empty());
    assert!(controller.is_collecting());
    controller.stop_session().unwrap();

    // Scheduled and final flushes together cover every persisted sample once
    let written = controller.status().samples_written as usize;
    let log = store.log();
    let unique: HashSet<_> = log.rows.iter().map(|(_, r)| r.timestamp).collect();
    assert_eq!(log.rows.len(), written);
    assert_eq!(unique.len(), written);
}

#[test]
fn test_override_enables_upload() {
    let dir = tempfile::tempdir().unwrap();
    let device = MockDevice::new();
    let handle = device.handle();
    handle.push_words(&counter_words(10));

    let store = RecordingStore::new();
    let config = ConfigBuilder::new(dir.path()).build();
    assert!(!config.upload.enabled);
    let mut controller = mock_controller(config, &handle, &store);

    let overrides = UploadOverrides {
        enabled: Some(true),
        host: Some("db.example".to_string()),
        ..Default::default()
    };
    controller.start_session("override", &overrides).unwrap();
    wait_until("samples persisted", || controller.status().samples_written == 10);
    controller.stop_session().unwrap();

    assert_eq!(store.log().rows.len(), 10);
}
