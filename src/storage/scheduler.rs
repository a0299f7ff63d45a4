//! Periodic flush of staging files to the remote store
//!
//! Every interval the scheduler asks the hub to retire the current staging
//! file, then uploads every retired file in creation order. Files newer than
//! the one just retired, and the file the hub is appending to, are left
//! alone.

use super::uploader::Uploader;
use crate::error::{DaqError, Result};
use crate::pipeline::hub::HubCommand;
use crate::session::state::SharedState;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long to wait for the hub to hand over a staging file
pub const ROTATION_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the scheduler thread
pub struct FlushScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<Uploader>>,
}

impl FlushScheduler {
    /// Start flushing `staging_dir` every `interval`
    pub fn spawn(
        uploader: Uploader,
        staging_dir: PathBuf,
        interval: Duration,
        hub: Sender<HubCommand>,
        shared: Arc<SharedState>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded(1);
        let mut worker = SchedulerWorker {
            uploader,
            staging_dir,
            hub,
            shared,
            last_retired: None,
        };

        let handle = std::thread::Builder::new()
            .name("flush-scheduler".to_string())
            .spawn(move || {
                worker.run(stop_rx, interval);
                worker.uploader
            })
            .map_err(DaqError::Io)?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the scheduler and get the uploader back for the final flush
    ///
    /// An upload in progress is finished first.
    pub fn stop(mut self) -> Result<Uploader> {
        // Dropping the sender wakes the thread
        self.stop_tx.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| DaqError::Channel("Flush scheduler panicked".to_string())),
            None => Err(DaqError::Channel("Flush scheduler already stopped".to_string())),
        }
    }
}

struct SchedulerWorker {
    uploader: Uploader,
    staging_dir: PathBuf,
    hub: Sender<HubCommand>,
    shared: Arc<SharedState>,
    /// Newest staging file the hub has handed over
    last_retired: Option<PathBuf>,
}

impl SchedulerWorker {
    fn run(&mut self, stop_rx: Receiver<()>, interval: Duration) {
        tracing::info!(
            "Flush scheduler started (every {:?} into {})",
            interval,
            self.uploader.table()
        );
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                default(interval) => self.tick(),
            }
        }
        tracing::debug!("Flush scheduler stopped");
    }

    fn tick(&mut self) {
        if let Some(retired) = self.request_rotation() {
            self.last_retired = Some(retired);
        }
        let Some(last) = self.last_retired.clone() else {
            tracing::debug!("Nothing staged yet");
            return;
        };

        let open = self.shared.snapshot().current_staging;
        let report = self.uploader.flush_pending_until(
            &self.staging_dir,
            Some(last.as_path()),
            open.as_deref(),
        );
        if report.uploaded_files > 0 {
            tracing::info!(
                "Flushed {} staging files ({} rows)",
                report.uploaded_files,
                report.uploaded_rows
            );
        }
        let remaining = report.remaining_files;
        self.shared.update(|s| s.pending_uploads = remaining);
    }

    fn request_rotation(&self) -> Option<PathBuf> {
        let (reply_tx, reply_rx) = bounded(1);
        if self.hub.send(HubCommand::RotateStaging { reply: reply_tx }).is_err() {
            tracing::debug!("Hub is gone; skipping rotation");
            return None;
        }
        match reply_rx.recv_timeout(ROTATION_REPLY_TIMEOUT) {
            Ok(retired) => retired.map(|f| f.path),
            Err(e) => {
                tracing::warn!("No staging rotation reply from the hub: {}", e);
                None
            }
        }
    }
}
