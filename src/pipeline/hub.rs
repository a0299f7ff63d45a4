//! Distribution hub: the single consumer of the acquisition queue.
//!
//! Every batch goes, in order, to:
//!
//! - the live-view window (only while a viewer is polling)
//! - the file rotator (primary record; failures are fatal)
//! - the current staging file, when uploads are enabled
//!
//! The hub owns the staging writer. The flush scheduler asks for a fresh
//! staging file through [`HubCommand::RotateStaging`] instead of touching
//! the file itself, so no file handle is shared between threads.
//!
//! After a fatal error the hub keeps draining the queue, discarding batches,
//! so the acquisition thread never blocks on a dead consumer.

use super::live_view::LiveView;
use super::queue::QueueConsumer;
use crate::error::{DaqError, Result};
use crate::session::state::SharedState;
use crate::storage::rotator::FileRotator;
use crate::storage::staging::{StagingFile, StagingWriter};
use crate::types::SampleBatch;
use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Requests handled by the hub thread
#[derive(Debug)]
pub enum HubCommand {
    /// Close the current staging file and reply with it
    RotateStaging {
        reply: Sender<Option<StagingFile>>,
    },
}

/// What the hub did over its lifetime
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HubSummary {
    /// Batches received from the queue
    pub batches: u64,
    /// Triplets written to segments
    pub samples_written: u64,
    /// Segments closed, including the last one
    pub segments_closed: u32,
    /// Staging file retired at shutdown, if any
    pub final_staging: Option<StagingFile>,
    /// Fatal error that stopped persistence
    pub error: Option<String>,
}

/// Handle to a running hub thread
pub struct HubHandle {
    cmd_tx: Sender<HubCommand>,
    handle: Option<JoinHandle<HubSummary>>,
}

impl HubHandle {
    /// Sender for commands to the hub
    pub fn commands(&self) -> Sender<HubCommand> {
        self.cmd_tx.clone()
    }

    /// Wait for the hub to drain the queue and exit
    ///
    /// The hub only exits once every producer of the queue is gone.
    pub fn join(mut self) -> Result<HubSummary> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| DaqError::Channel("Hub thread panicked".to_string())),
            None => Ok(HubSummary::default()),
        }
    }
}

/// The hub's thread-local state
pub struct DistributionHub {
    consumer: QueueConsumer,
    rotator: FileRotator,
    staging: Option<StagingWriter>,
    live: Arc<LiveView>,
    shared: Arc<SharedState>,
    acquisition_running: Arc<AtomicBool>,
    summary: HubSummary,
}

impl DistributionHub {
    /// Assemble a hub
    ///
    /// `acquisition_running` is cleared on a fatal error so the producer
    /// stops polling the device.
    pub fn new(
        consumer: QueueConsumer,
        rotator: FileRotator,
        staging: Option<StagingWriter>,
        live: Arc<LiveView>,
        shared: Arc<SharedState>,
        acquisition_running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            consumer,
            rotator,
            staging,
            live,
            shared,
            acquisition_running,
            summary: HubSummary::default(),
        }
    }

    /// Run the hub on its own thread
    pub fn spawn(self) -> Result<HubHandle> {
        let (cmd_tx, cmd_rx) = bounded(8);
        let handle = std::thread::Builder::new()
            .name("hub".to_string())
            .spawn(move || self.run(cmd_rx))
            .map_err(DaqError::Io)?;
        Ok(HubHandle {
            cmd_tx,
            handle: Some(handle),
        })
    }

    fn run(mut self, cmd_rx: Receiver<HubCommand>) -> HubSummary {
        tracing::debug!("Hub started");
        let batches = self.consumer.receiver().clone();
        let no_commands = never();
        let mut commands_open = true;

        loop {
            let commands = if commands_open { &cmd_rx } else { &no_commands };
            select! {
                recv(batches) -> msg => match msg {
                    Ok(batch) => self.handle_batch(batch),
                    Err(_) => break,
                },
                recv(commands) -> cmd => match cmd {
                    Ok(cmd) => self.handle_command(cmd),
                    // Nobody sends commands any more; keep draining batches
                    Err(_) => commands_open = false,
                },
            }
        }

        self.shutdown();
        tracing::debug!(
            "Hub exiting after {} batches ({} samples persisted)",
            self.summary.batches,
            self.summary.samples_written
        );
        self.summary
    }

    fn failed(&self) -> bool {
        self.summary.error.is_some()
    }

    fn handle_batch(&mut self, batch: SampleBatch) {
        self.summary.batches += 1;
        if self.failed() {
            return;
        }

        self.live.offer(&batch);

        if let Err(e) = self.persist(&batch) {
            self.fail(e);
        }
    }

    fn persist(&mut self, batch: &SampleBatch) -> Result<()> {
        let closed = self.rotator.write_batch(batch)?;
        self.summary.segments_closed += closed.len() as u32;
        self.summary.samples_written += batch.len() as u64;

        let staging_path = match self.staging.as_mut() {
            Some(staging) => {
                staging.append(batch)?;
                staging.current_path().map(|p| p.to_path_buf())
            }
            None => None,
        };

        let current_segment = self.rotator.current_segment().cloned();
        let samples_written = self.summary.samples_written;
        self.shared.update(|s| {
            s.current_segment = current_segment;
            s.samples_written = samples_written;
            if staging_path.is_some() {
                s.current_staging = staging_path;
            }
        });
        Ok(())
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::RotateStaging { reply } => {
                let retired = self.rotate_staging();
                // The requester may have given up waiting
                let _ = reply.send(retired);
            }
        }
    }

    fn rotate_staging(&mut self) -> Option<StagingFile> {
        let staging = self.staging.as_mut()?;
        match staging.rotate() {
            Ok(retired) => {
                self.shared.update(|s| s.current_staging = None);
                retired
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn fail(&mut self, err: DaqError) {
        let message = err.to_string();
        tracing::error!("Persistence failed, stopping session: {}", message);
        self.summary.error = Some(message.clone());
        self.shared.record_fatal(message);
        self.acquisition_running.store(false, Ordering::SeqCst);
    }

    fn shutdown(&mut self) {
        match self.rotator.close() {
            Ok(Some(_)) => self.summary.segments_closed += 1,
            Ok(None) => {}
            Err(e) if !self.failed() => self.fail(e),
            Err(e) => tracing::warn!("Failed to close segment after an earlier error: {}", e),
        }

        if let Some(staging) = self.staging.as_mut() {
            match staging.rotate() {
                Ok(retired) => self.summary.final_staging = retired,
                Err(e) => tracing::warn!("Failed to close staging file: {}", e),
            }
        }

        self.shared.update(|s| {
            s.current_segment = None;
            s.current_staging = None;
        });
    }
}
