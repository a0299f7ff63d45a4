//! Acquisition loop
//!
//! Runs on its own thread and turns the instrument's FIFO into an ordered
//! stream of [`SampleBatch`]es. Each cycle:
//!
//! 1. make sure the link is up (reconnect with retries otherwise)
//! 2. learn the backlog, either from the previous read's header or from the
//!    pending-count register
//! 3. pick a read mode and read; Bulk bursts repeat until the backlog falls
//!    to the Normal threshold or the poll budget runs out
//! 4. reassemble complete triplets and push them into the bounded queue
//!
//! Device faults never end the loop; they count as "no data this cycle".

use super::read_mode::{bulk_backlog_remains, select_mode, ReadMode};
use super::reassembler::FrameReassembler;
use super::register_client::RegisterClient;
use crate::config::DeviceConfig;
use crate::error::{DaqError, Result};
use crate::pipeline::queue::QueueProducer;
use crate::session::state::SharedState;
use crate::types::ConnectionStatus;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Sleep after a failed reconnect
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Sleep when the device has nothing pending
pub const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// How often bus statistics are copied into the shared state
pub const BUS_STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of the acquisition thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Idle,
        }
    }
}

/// Timing knobs of the loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    /// Upper bound on one Bulk drain
    pub poll_budget: Duration,
    /// Sleep after a failed reconnect
    pub reconnect_backoff: Duration,
    /// Sleep when nothing is pending
    pub idle_sleep: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_budget: Duration::from_millis(50),
            reconnect_backoff: RECONNECT_BACKOFF,
            idle_sleep: IDLE_SLEEP,
        }
    }
}

impl AcquisitionSettings {
    /// Build the settings from device configuration
    pub fn from_device_config(config: &DeviceConfig) -> Self {
        Self {
            poll_budget: config.poll_budget(),
            ..Default::default()
        }
    }
}

/// Handle to a running acquisition thread
pub struct AcquisitionLoop {
    running: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    reassembler: Arc<FrameReassembler>,
    handle: Option<JoinHandle<RegisterClient>>,
}

impl AcquisitionLoop {
    /// Start polling on a new thread
    ///
    /// The client must already be connected and initialised.
    pub fn spawn(
        client: RegisterClient,
        reassembler: Arc<FrameReassembler>,
        producer: QueueProducer,
        shared: Arc<SharedState>,
        settings: AcquisitionSettings,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(AtomicU8::new(LoopState::Running as u8));

        let mut worker = AcquisitionWorker {
            seen_generation: client.generation(),
            client,
            reassembler: Arc::clone(&reassembler),
            producer,
            shared,
            settings,
            running: Arc::clone(&running),
            next_index: 0,
            carried_backlog: 0,
            link: ConnectionStatus::Disconnected,
            stats_published: None,
        };

        let handle = std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                worker.run();
                worker.client
            })
            .map_err(DaqError::Io)?;

        Ok(Self {
            running,
            state,
            reassembler,
            handle: Some(handle),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Flag that keeps the loop alive; clearing it ends the loop after the
    /// in-flight poll
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Whether the thread has exited on its own
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the loop, wait for it and release the link
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.state.store(LoopState::Stopping as u8, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        let result = match handle.join() {
            Ok(mut client) => {
                client.disconnect();
                Ok(())
            }
            Err(_) => Err(DaqError::Channel("Acquisition thread panicked".to_string())),
        };

        let dropped = self.reassembler.reset();
        if dropped > 0 {
            tracing::warn!("Discarded {} words of an incomplete triplet at stop", dropped);
        }

        self.state.store(LoopState::Idle as u8, Ordering::SeqCst);
        tracing::info!("Acquisition stopped");
        result
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
    }
}

/// State owned by the acquisition thread
struct AcquisitionWorker {
    client: RegisterClient,
    reassembler: Arc<FrameReassembler>,
    producer: QueueProducer,
    shared: Arc<SharedState>,
    settings: AcquisitionSettings,
    running: Arc<AtomicBool>,
    seen_generation: u64,
    /// Global index of the next emitted triplet
    next_index: u64,
    /// Backlog reported by the last read's header
    carried_backlog: usize,
    /// Last link state published to the shared state
    link: ConnectionStatus,
    stats_published: Option<Instant>,
}

impl AcquisitionWorker {
    fn run(&mut self) {
        tracing::info!("Acquisition started on {}", self.client.describe());

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once() {
                // Only a vanished consumer ends the loop
                tracing::error!("Acquisition loop ending: {}", e);
                break;
            }
        }

        tracing::debug!(
            "Acquisition loop exited after {} triplets ({:.1}% bus success)",
            self.next_index,
            self.client.stats().success_rate()
        );
    }

    fn poll_once(&mut self) -> Result<()> {
        if !self.client.ensure_connected() {
            self.set_link(ConnectionStatus::Error);
            self.carried_backlog = 0;
            std::thread::sleep(self.settings.reconnect_backoff);
            return Ok(());
        }
        self.set_link(ConnectionStatus::Connected);

        if self.client.generation() != self.seen_generation {
            self.seen_generation = self.client.generation();
            self.carried_backlog = 0;
            let dropped = self.reassembler.reset();
            if dropped > 0 {
                tracing::warn!("Dropped {} words carried across a reconnect", dropped);
            }
        }

        let pending = if self.carried_backlog > 0 {
            self.carried_backlog
        } else {
            match self.client.read_pending_count() {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("Failed to read pending count: {}", e);
                    return Ok(());
                }
            }
        };

        let Some((mode, count)) = select_mode(pending).request() else {
            self.carried_backlog = 0;
            std::thread::sleep(self.settings.idle_sleep);
            return Ok(());
        };

        let raw = self.drain(mode, count);
        self.publish_bus_stats();
        if raw.is_empty() {
            return Ok(());
        }

        let batch = self.reassembler.push(&raw, self.next_index);
        if batch.is_empty() {
            return Ok(());
        }

        self.next_index = batch.end_index();
        self.producer.push(batch)?;
        self.shared.increment_batch_counter();
        Ok(())
    }

    fn set_link(&mut self, link: ConnectionStatus) {
        if self.link != link {
            self.link = link;
            self.shared.update(|s| s.link = link);
        }
    }

    fn publish_bus_stats(&mut self) {
        if self
            .stats_published
            .is_some_and(|at| at.elapsed() < BUS_STATS_INTERVAL)
        {
            return;
        }
        self.stats_published = Some(Instant::now());
        let stats = self.client.stats();
        let (success_rate, avg_us) = (stats.success_rate(), stats.recent_avg_us());
        self.shared.update(|s| {
            s.bus_success_rate = success_rate;
            s.bus_avg_read_us = avg_us;
        });
    }

    /// Issue one read, plus further Bulk bursts while the backlog stays large
    fn drain(&mut self, mode: ReadMode, count: usize) -> Vec<u16> {
        let deadline = Instant::now() + self.settings.poll_budget;
        let mut raw = Vec::new();
        let mut count = count;

        loop {
            match self.client.read_samples(mode, count) {
                Ok(read) => {
                    raw.extend_from_slice(&read.words);
                    self.carried_backlog = read.remaining;
                }
                Err(e) => {
                    tracing::warn!("{} read of {} scalars failed: {}", mode, count, e);
                    self.carried_backlog = 0;
                    break;
                }
            }

            let more = mode == ReadMode::Bulk
                && bulk_backlog_remains(self.carried_backlog)
                && Instant::now() < deadline
                && self.running.load(Ordering::SeqCst);
            if !more {
                break;
            }
            match select_mode(self.carried_backlog).request() {
                Some((ReadMode::Bulk, next)) => count = next,
                _ => break,
            }
        }

        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_device::{MockDevice, MockDeviceHandle};
    use crate::backend::retry::RetryPolicy;
    use crate::pipeline::queue::{acquisition_queue, Dequeued, QueueConsumer};
    use crate::types::scale_raw;

    fn fast_settings() -> AcquisitionSettings {
        AcquisitionSettings {
            poll_budget: Duration::from_millis(50),
            reconnect_backoff: Duration::from_millis(5),
            idle_sleep: Duration::from_millis(1),
        }
    }

    fn start(
        capacity: usize,
    ) -> (AcquisitionLoop, MockDeviceHandle, QueueConsumer, Arc<SharedState>) {
        let device = MockDevice::new();
        let handle = device.handle();
        let mut client = RegisterClient::new(Box::new(device))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
        client.connect().unwrap();

        let (tx, rx) = acquisition_queue(capacity);
        let shared = Arc::new(SharedState::new());
        shared.try_begin();
        let acq = AcquisitionLoop::spawn(
            client,
            Arc::new(FrameReassembler::new()),
            tx,
            Arc::clone(&shared),
            fast_settings(),
        )
        .unwrap();
        (acq, handle, rx, shared)
    }

    fn collect_words(rx: &QueueConsumer, expected_triplets: usize) -> Vec<f64> {
        let mut values = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while values.len() < expected_triplets * 3 && Instant::now() < deadline {
            if let Dequeued::Batch(batch) = rx.pop_timeout(Duration::from_millis(20)) {
                values.extend(batch.flatten());
            }
        }
        values
    }

    #[test]
    fn test_streams_fifo_in_order() {
        let (mut acq, handle, rx, shared) = start(100);
        assert_eq!(acq.state(), LoopState::Running);

        let words: Vec<u16> = (0..600).collect();
        handle.push_words(&words);

        let values = collect_words(&rx, 200);
        let expected: Vec<f64> = words.iter().map(|&w| scale_raw(w)).collect();
        assert_eq!(values, expected);
        assert!(shared.batch_counter() > 0);

        acq.stop().unwrap();
        assert_eq!(acq.state(), LoopState::Idle);
    }

    #[test]
    fn test_start_indices_are_contiguous() {
        let (mut acq, handle, rx, _shared) = start(100);
        handle.push_words(&(0..90).collect::<Vec<u16>>());
        std::thread::sleep(Duration::from_millis(30));
        handle.push_words(&(90..300).collect::<Vec<u16>>());

        let mut next = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while next < 100 && Instant::now() < deadline {
            if let Dequeued::Batch(batch) = rx.pop_timeout(Duration::from_millis(20)) {
                assert_eq!(batch.start_index, next);
                next = batch.end_index();
            }
        }
        assert_eq!(next, 100);
        acq.stop().unwrap();
    }

    #[test]
    fn test_recovers_after_read_failures() {
        let (mut acq, handle, rx, shared) = start(100);
        handle.fail_next_reads(2);
        std::thread::sleep(Duration::from_millis(30));

        handle.push_words(&[8192, 8192, 8192]);
        let values = collect_words(&rx, 1);
        assert_eq!(values, vec![1.0, 1.0, 1.0]);
        assert!(handle.connect_count() >= 2);
        assert_eq!(shared.snapshot().link, ConnectionStatus::Connected);
        acq.stop().unwrap();
    }

    #[test]
    fn test_bus_health_is_published() {
        let (mut acq, handle, rx, shared) = start(100);
        handle.fail_next_reads(1);
        handle.push_words(&[8192, 8192, 8192]);
        collect_words(&rx, 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while shared.snapshot().bus_success_rate == 0.0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let snapshot = shared.snapshot();
        assert!(snapshot.bus_success_rate > 0.0);
        assert!(snapshot.bus_success_rate <= 100.0);
        assert!(snapshot.bus_avg_read_us >= 0.0);
        acq.stop().unwrap();
    }

    #[test]
    fn test_stop_with_partial_triplet() {
        let (mut acq, handle, rx, _shared) = start(100);
        handle.push_words(&[1, 2, 3, 4]);
        let values = collect_words(&rx, 1);
        assert_eq!(values.len(), 3);

        acq.stop().unwrap();
        assert_eq!(acq.state(), LoopState::Idle);
        assert!(acq.is_finished());
        // Stop is idempotent
        acq.stop().unwrap();
    }

    #[test]
    fn test_backpressure_keeps_every_sample() {
        let (mut acq, handle, rx, _shared) = start(1);
        let words: Vec<u16> = (0..3000).collect();
        handle.push_words(&words);

        // Let the producer hit the full queue before draining
        std::thread::sleep(Duration::from_millis(50));
        let values = collect_words(&rx, 1000);
        assert_eq!(values.len(), 3000);
        assert_eq!(values[2999], scale_raw(2999));
        acq.stop().unwrap();
    }
}
