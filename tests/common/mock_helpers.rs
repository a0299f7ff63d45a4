//! Mock construction helpers

use std::sync::{Arc, Mutex, MutexGuard};
use vibdaq_rs::backend::{MockDeviceHandle, RegisterBus};
use vibdaq_rs::config::{DaqConfig, DeviceConfig};
use vibdaq_rs::error::{DaqError, Result};
use vibdaq_rs::session::SessionController;
use vibdaq_rs::storage::{RemoteStore, StagedRow, UploadTarget};

/// What a [`RecordingStore`] has seen
#[derive(Debug, Default)]
pub struct StoreLog {
    pub connects: u32,
    pub tables: Vec<String>,
    pub inserts: u32,
    pub rows: Vec<(String, StagedRow)>,
    /// Connect attempts still to refuse
    pub refuse_connects: u32,
}

/// In-memory remote store that records every committed row
#[derive(Clone, Default)]
pub struct RecordingStore {
    log: Arc<Mutex<StoreLog>>,
    connected: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connect attempts
    pub fn refuse_connects(&self, n: u32) {
        self.log().refuse_connects = n;
    }

    pub fn log(&self) -> MutexGuard<'_, StoreLog> {
        self.log.lock().unwrap()
    }

    /// A fresh, disconnected store sharing this one's log
    pub fn share(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            connected: false,
        }
    }
}

impl RemoteStore for RecordingStore {
    fn connect(&mut self) -> Result<()> {
        let mut log = self.log();
        if log.refuse_connects > 0 {
            log.refuse_connects -= 1;
            drop(log);
            self.connected = false;
            return Err(DaqError::Upload("Connection refused".to_string()));
        }
        log.connects += 1;
        drop(log);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn ensure_table(&mut self, table: &str) -> Result<()> {
        self.log().tables.push(table.to_string());
        Ok(())
    }

    fn insert_rows(&mut self, _table: &str, label: &str, rows: &[StagedRow]) -> Result<()> {
        let mut log = self.log();
        log.inserts += 1;
        log.rows
            .extend(rows.iter().map(|r| (label.to_string(), *r)));
        Ok(())
    }
}

/// Controller over a shared mock instrument and recording store
pub fn mock_controller(
    config: DaqConfig,
    device: &MockDeviceHandle,
    store: &RecordingStore,
) -> SessionController {
    let device = device.clone();
    let store = store.clone();
    SessionController::with_backends(
        config,
        Box::new(move |_: &DeviceConfig| -> Box<dyn RegisterBus> { Box::new(device.device()) }),
        Box::new(move |_: &UploadTarget| -> Box<dyn RemoteStore> { Box::new(store.share()) }),
    )
}
