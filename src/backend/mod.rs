//! Device side of the pipeline
//!
//! Everything that talks to the instrument lives here and runs on the
//! acquisition thread.
//!
//! # Components
//!
//! - [`RegisterBus`] - raw register transactions ([`ModbusRtuBus`] over a
//!   serial port, [`MockDevice`] in memory)
//! - [`RegisterClient`] - the instrument's register map, probe on connect,
//!   bounded reconnect
//! - [`read_mode`] - Normal/Bulk selection from the pending backlog
//! - [`FrameReassembler`] - whole-triplet batches from arbitrary-length reads
//! - [`AcquisitionLoop`] - the polling thread feeding the acquisition queue
//! - [`RetryPolicy`] - bounded retry with linear backoff, shared with uploads

pub mod acquisition;
pub mod mock_device;
pub mod modbus_rtu;
pub mod read_mode;
pub mod reassembler;
pub mod register_bus;
pub mod register_client;
pub mod retry;

pub use acquisition::{AcquisitionLoop, AcquisitionSettings, LoopState};
pub use mock_device::{MockDevice, MockDeviceHandle, MockWaveform};
pub use modbus_rtu::{list_serial_ports, ModbusRtuBus, SerialSettings};
pub use read_mode::{select_mode, ReadMode, ReadPlan};
pub use reassembler::FrameReassembler;
pub use register_bus::{BusStats, RegisterBus};
pub use register_client::{RawRead, RegisterClient};
pub use retry::RetryPolicy;
