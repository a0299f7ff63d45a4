//! Session lifecycle
//!
//! [`SessionController`] wires the pipeline together on start and tears it
//! down in order on stop:
//!
//! 1. acquisition stops and joins, dropping the queue's only producer
//! 2. the hub drains the queue, closes the segment and the staging file
//! 3. the flush scheduler stops, handing back its uploader
//! 4. one final flush uploads every staging file still on disk
//!
//! Only one session runs at a time.

use super::state::{SessionState, SharedState};
use crate::backend::acquisition::{AcquisitionLoop, AcquisitionSettings};
use crate::backend::modbus_rtu::{ModbusRtuBus, SerialSettings};
use crate::backend::reassembler::FrameReassembler;
use crate::backend::register_bus::RegisterBus;
use crate::backend::register_client::RegisterClient;
use crate::config::{DaqConfig, DeviceConfig, UploadOverrides};
use crate::error::{DaqError, Result};
use crate::pipeline::hub::{DistributionHub, HubHandle};
use crate::pipeline::live_view::LiveView;
use crate::pipeline::queue::acquisition_queue;
use crate::storage::clock::SampleClock;
use crate::storage::mysql_store::MySqlStore;
use crate::storage::remote::{RemoteStore, UploadTarget};
use crate::storage::rotator::FileRotator;
use crate::storage::scheduler::FlushScheduler;
use crate::storage::staging::{staging_dir, StagingWriter};
use crate::storage::uploader::Uploader;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Creates the register bus for a session
pub type BusFactory = Box<dyn FnMut(&DeviceConfig) -> Box<dyn RegisterBus> + Send>;

/// Creates the remote store for a session
pub type StoreFactory = Box<dyn FnMut(&UploadTarget) -> Box<dyn RemoteStore> + Send>;

/// Freshest samples for the live viewer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestSamples {
    /// Flattened `[x1, y1, z1, x2, ...]`
    pub data: Vec<f64>,
    /// Batch counter at the time of the request
    pub counter: u64,
}

/// Threads and paths of the running session
struct ActiveSession {
    label: String,
    session_dir: PathBuf,
    acquisition: AcquisitionLoop,
    hub: HubHandle,
    scheduler: Option<FlushScheduler>,
}

/// Starts and stops collection sessions
pub struct SessionController {
    config: DaqConfig,
    bus_factory: BusFactory,
    store_factory: StoreFactory,
    shared: Arc<SharedState>,
    live: Arc<LiveView>,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Controller talking to the serial instrument and MySQL
    pub fn new(config: DaqConfig) -> Self {
        Self::with_backends(
            config,
            Box::new(|device: &DeviceConfig| -> Box<dyn RegisterBus> {
                Box::new(ModbusRtuBus::new(SerialSettings::from_device_config(device)))
            }),
            Box::new(|target: &UploadTarget| -> Box<dyn RemoteStore> {
                Box::new(MySqlStore::new(target.clone()))
            }),
        )
    }

    /// Controller with custom bus and store constructors
    pub fn with_backends(
        config: DaqConfig,
        bus_factory: BusFactory,
        store_factory: StoreFactory,
    ) -> Self {
        let live = Arc::new(LiveView::new(config.storage.live_view_samples));
        Self {
            config,
            bus_factory,
            store_factory,
            shared: Arc::new(SharedState::new()),
            live,
            active: None,
        }
    }

    /// Base configuration; upload overrides are applied per session
    pub fn config(&self) -> &DaqConfig {
        &self.config
    }

    /// Shared state, for callers that want to watch it directly
    pub fn shared_state(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    /// Directory of the running (or last) session
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.shared.snapshot().session_dir
    }

    /// Start collecting into a new session directory
    ///
    /// Returns a human-readable confirmation. On any error no thread is left
    /// running and the device link is released.
    pub fn start_session(&mut self, label: &str, overrides: &UploadOverrides) -> Result<String> {
        if self.active.is_some() {
            if self.shared.is_collecting() {
                return Err(DaqError::AlreadyRunning);
            }
            // The previous session died on a fatal error; reap its threads
            if let Err(e) = self.stop_session() {
                tracing::warn!("Previous session ended with an error: {}", e);
            }
        }

        let label = sanitize_label(label)
            .ok_or_else(|| DaqError::Config("A session label is required".to_string()))?;

        let mut config = self.config.clone();
        config.upload = config.upload.with_overrides(overrides);
        config.validate()?;

        if !self.shared.try_begin() {
            return Err(DaqError::AlreadyRunning);
        }

        match self.launch(&config, &label) {
            Ok(active) => {
                let message = format!(
                    "Collection started in {}",
                    active.session_dir.display()
                );
                tracing::info!("{}", message);
                self.active = Some(active);
                Ok(message)
            }
            Err(e) => {
                tracing::error!("Failed to start session {}: {}", label, e);
                self.shared.finish();
                Err(e)
            }
        }
    }

    fn launch(&mut self, config: &DaqConfig, label: &str) -> Result<ActiveSession> {
        let device = &config.device;
        let mut client = RegisterClient::new((self.bus_factory)(device))
            .with_probe_timeout(device.probe_timeout());
        client.connect()?;
        let sample_rate_hz = match client.init_device(device.sample_rate_hz) {
            Ok(rate) => rate,
            Err(e) => {
                client.disconnect();
                return Err(e);
            }
        };

        let started_at = Local::now().naive_local();
        let session_dir = config
            .storage
            .output_dir
            .join(format!("{}_{}", started_at.format("%Y%m%d%H%M%S"), label));
        if let Err(e) = std::fs::create_dir_all(&session_dir) {
            client.disconnect();
            return Err(DaqError::Persistence(format!(
                "Failed to create session directory {:?}: {}",
                session_dir, e
            )));
        }

        let clock = SampleClock::new(started_at, sample_rate_hz);
        let rotator = FileRotator::new(
            &session_dir,
            label,
            clock,
            config.storage.segment_seconds,
            device.channel_count,
        );
        let staging = if config.upload.enabled {
            match StagingWriter::new(&session_dir, clock) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    client.disconnect();
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.shared.update(|s| {
            s.sample_rate_hz = sample_rate_hz;
            s.channel_count = device.channel_count;
            s.label = Some(label.to_string());
            s.session_dir = Some(session_dir.clone());
            s.started_at = Some(started_at);
        });
        self.live.clear();

        let (producer, consumer) = acquisition_queue(device.queue_capacity);
        let mut acquisition = AcquisitionLoop::spawn(
            client,
            Arc::new(FrameReassembler::new()),
            producer,
            Arc::clone(&self.shared),
            AcquisitionSettings::from_device_config(device),
        )?;

        let hub = DistributionHub::new(
            consumer,
            rotator,
            staging,
            Arc::clone(&self.live),
            Arc::clone(&self.shared),
            acquisition.running_flag(),
        )
        .spawn();
        let hub = match hub {
            Ok(hub) => hub,
            Err(e) => {
                let _ = acquisition.stop();
                return Err(e);
            }
        };

        let scheduler = if config.upload.enabled {
            let spawned = self.spawn_scheduler(config, label, &session_dir, &hub);
            match spawned {
                Ok(scheduler) => Some(scheduler),
                Err(e) => {
                    let _ = acquisition.stop();
                    let _ = hub.join();
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(ActiveSession {
            label: label.to_string(),
            session_dir,
            acquisition,
            hub,
            scheduler,
        })
    }

    fn spawn_scheduler(
        &mut self,
        config: &DaqConfig,
        label: &str,
        session_dir: &Path,
        hub: &HubHandle,
    ) -> Result<FlushScheduler> {
        let dir_name = session_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = UploadTarget::resolve(&config.upload, &dir_name);
        tracing::info!("Uploading to {}", target.describe());

        let store = (self.store_factory)(&target);
        let uploader = Uploader::new(store, target.table.clone(), label);
        FlushScheduler::spawn(
            uploader,
            staging_dir(session_dir),
            config.upload.interval(),
            hub.commands(),
            Arc::clone(&self.shared),
        )
    }

    /// Stop the running session
    ///
    /// Stopping when nothing runs is not an error. If the session hit a
    /// fatal persistence error, the error is returned after teardown.
    pub fn stop_session(&mut self) -> Result<String> {
        let Some(mut active) = self.active.take() else {
            return Ok("Collection is not running".to_string());
        };
        tracing::info!("Stopping session {}", active.label);

        if let Err(e) = active.acquisition.stop() {
            tracing::error!("{}", e);
        }

        let summary = match active.hub.join() {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("{}", e);
                Default::default()
            }
        };

        if let Some(scheduler) = active.scheduler.take() {
            match scheduler.stop() {
                Ok(mut uploader) => {
                    let report = uploader.flush_pending(&staging_dir(&active.session_dir));
                    uploader.disconnect();
                    if let Some(ref error) = report.error {
                        tracing::warn!(
                            "{} staging files remain after the final flush: {}",
                            report.remaining_files,
                            error
                        );
                    }
                    let remaining = report.remaining_files;
                    self.shared.update(|s| s.pending_uploads = remaining);
                }
                Err(e) => tracing::error!("{}", e),
            }
        }

        self.shared.finish();
        tracing::info!(
            "Session {} stopped: {} samples in {} segments",
            active.label,
            summary.samples_written,
            summary.segments_closed
        );

        match self.shared.last_error() {
            Some(error) => Err(DaqError::Persistence(format!(
                "Session stopped after a fatal error: {}",
                error
            ))),
            None => Ok(format!(
                "Collection stopped ({} samples written)",
                summary.samples_written
            )),
        }
    }

    /// Whether a session is collecting
    pub fn is_collecting(&self) -> bool {
        self.shared.is_collecting()
    }

    /// Snapshot of the session state
    pub fn status(&self) -> SessionState {
        self.shared.snapshot()
    }

    /// Freshest samples; also keeps the live window fed for a while
    pub fn latest_samples(&self) -> LatestSamples {
        LatestSamples {
            data: self.live.latest(),
            counter: self.shared.batch_counter(),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.stop_session() {
                tracing::warn!("{}", e);
            }
        }
    }
}

/// Make a label safe for directory and file names
///
/// Keeps ASCII letters, digits, `-` and `_`; everything else becomes `_`.
/// Returns `None` for a label with nothing usable in it.
pub fn sanitize_label(label: &str) -> Option<String> {
    let sanitized: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('_').is_empty() {
        None
    } else {
        Some(sanitized)
    }
}
