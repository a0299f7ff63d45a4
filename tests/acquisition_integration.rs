//! Integration tests for the acquisition side
//!
//! These tests run the acquisition thread against the simulated instrument:
//! - Large backlogs drained through Bulk reads without reordering
//! - Malformed frames and reconnects never shifting channel alignment
//! - A full queue blocking the producer instead of losing batches

mod common;

use common::builders::counter_words;
use common::test_timeout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vibdaq_rs::backend::{
    AcquisitionLoop, AcquisitionSettings, FrameReassembler, MockDevice, MockDeviceHandle,
    RegisterClient, RetryPolicy,
};
use vibdaq_rs::pipeline::{acquisition_queue, Dequeued, QueueConsumer};
use vibdaq_rs::session::SharedState;
use vibdaq_rs::types::{scale_raw, SampleBatch};

struct Rig {
    acquisition: AcquisitionLoop,
    device: MockDeviceHandle,
    queue: QueueConsumer,
}

fn start(capacity: usize) -> Rig {
    let device = MockDevice::new();
    let handle = device.handle();
    let mut client = RegisterClient::new(Box::new(device))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
    client.connect().unwrap();
    client.init_device(1000).unwrap();

    let (producer, queue) = acquisition_queue(capacity);
    let shared = Arc::new(SharedState::new());
    shared.try_begin();
    let settings = AcquisitionSettings {
        poll_budget: Duration::from_millis(50),
        reconnect_backoff: Duration::from_millis(5),
        idle_sleep: Duration::from_millis(1),
    };
    let acquisition = AcquisitionLoop::spawn(
        client,
        Arc::new(FrameReassembler::new()),
        producer,
        shared,
        settings,
    )
    .unwrap();

    Rig {
        acquisition,
        device: handle,
        queue,
    }
}

fn collect(queue: &QueueConsumer, triplets: usize) -> Vec<SampleBatch> {
    let mut batches = Vec::new();
    let mut received = 0;
    let deadline = Instant::now() + test_timeout();
    while received < triplets && Instant::now() < deadline {
        if let Dequeued::Batch(batch) = queue.pop_timeout(Duration::from_millis(20)) {
            received += batch.len();
            batches.push(batch);
        }
    }
    batches
}

#[test]
fn test_bulk_backlog_drains_in_order() {
    let mut rig = start(10_000);
    rig.device.push_words(&counter_words(10_000));

    let batches = collect(&rig.queue, 10_000);
    let mut next = 0;
    for batch in &batches {
        assert_eq!(batch.start_index, next);
        next = batch.end_index();
    }
    assert_eq!(next, 10_000);

    let values: Vec<f64> = batches.iter().flat_map(|b| b.flatten()).collect();
    for (i, value) in values.iter().enumerate() {
        assert_eq!(*value, scale_raw(i as u16));
    }
    assert_eq!(rig.device.pending(), 0);
    rig.acquisition.stop().unwrap();
}

#[test]
fn test_malformed_frame_keeps_alignment() {
    let mut rig = start(100);
    // Five words: one triplet plus a two-word tail, the tail is cut short
    rig.device.truncate_next_response(1);
    rig.device.push_words(&[1, 2, 3, 4, 5]);

    // The short response drops the link; wait for the reconnect
    let deadline = Instant::now() + test_timeout();
    while rig.device.connect_count() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(rig.device.connect_count() >= 2);

    rig.device.push_words(&[8192, 16384, 24576]);
    let values: Vec<f64> = collect(&rig.queue, 1)
        .iter()
        .flat_map(|b| b.flatten())
        .collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0]);
    rig.acquisition.stop().unwrap();
}

#[test]
fn test_reconnects_after_refused_connects() {
    let mut rig = start(100);
    rig.device.fail_next_connects(2);
    rig.device.fail_next_reads(1);

    let deadline = Instant::now() + test_timeout();
    while rig.device.connect_count() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    rig.device.push_words(&counter_words(4));
    let batches = collect(&rig.queue, 4);
    let total: usize = batches.iter().map(|b| b.len()).sum();
    assert_eq!(total, 4);
    rig.acquisition.stop().unwrap();
}

#[test]
fn test_full_queue_blocks_producer() {
    let mut rig = start(1);
    rig.device.push_words(&counter_words(2000));

    // Nobody consumes for a while; the queue stays at capacity
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rig.queue.len(), 1);

    let batches = collect(&rig.queue, 2000);
    let total: usize = batches.iter().map(|b| b.len()).sum();
    assert_eq!(total, 2000);
    assert_eq!(batches.last().unwrap().end_index(), 2000);
    rig.acquisition.stop().unwrap();
}
