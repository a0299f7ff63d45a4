//! Bounded handoff between the acquisition thread and the hub.
//!
//! This is the only backpressured edge of the pipeline: when the consumer
//! falls behind, [`QueueProducer::push`] blocks the acquisition loop instead
//! of dropping or reordering batches.

use crate::error::{DaqError, Result};
use crate::types::SampleBatch;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Producer side of the acquisition queue
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: Sender<SampleBatch>,
}

/// Consumer side of the acquisition queue
#[derive(Debug, Clone)]
pub struct QueueConsumer {
    rx: Receiver<SampleBatch>,
}

/// Outcome of a bounded wait on the consumer side
#[derive(Debug, PartialEq)]
pub enum Dequeued {
    /// A batch arrived
    Batch(SampleBatch),
    /// Nothing arrived within the wait
    Empty,
    /// Every producer is gone and the queue is drained
    Closed,
}

/// Create a queue holding at most `capacity` batches
pub fn acquisition_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = bounded(capacity.max(1));
    (QueueProducer { tx }, QueueConsumer { rx })
}

impl QueueProducer {
    /// Enqueue a batch, blocking while the queue is full
    pub fn push(&self, batch: SampleBatch) -> Result<()> {
        self.tx
            .send(batch)
            .map_err(|_| DaqError::Channel("Acquisition queue consumer is gone".to_string()))
    }

    /// Batches currently waiting
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether no batches are waiting
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Whether the queue is at capacity
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }
}

impl QueueConsumer {
    /// Wait up to `timeout` for the next batch
    pub fn pop_timeout(&self, timeout: Duration) -> Dequeued {
        match self.rx.recv_timeout(timeout) {
            Ok(batch) => Dequeued::Batch(batch),
            Err(RecvTimeoutError::Timeout) => Dequeued::Empty,
            Err(RecvTimeoutError::Disconnected) => Dequeued::Closed,
        }
    }

    /// Underlying receiver, for use in `select!`
    pub fn receiver(&self) -> &Receiver<SampleBatch> {
        &self.rx
    }

    /// Batches currently waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no batches are waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
