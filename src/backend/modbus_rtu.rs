//! Modbus-RTU transport over a serial port
//!
//! Uses the blocking client of `tokio-modbus`, which drives its own
//! single-threaded runtime internally. The acquisition thread therefore stays
//! a plain OS thread and no async runtime leaks into the rest of the crate.

use super::register_bus::{BusStats, RegisterBus};
use crate::config::DeviceConfig;
use crate::error::{DaqError, Result};
use std::time::{Duration, Instant};
use tokio_modbus::client::sync::{rtu, Context, Reader, Writer};
use tokio_modbus::Slave;

/// Serial line settings for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    /// Serial port path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Modbus slave id
    pub slave_id: u8,
    /// Per-transaction response timeout
    pub response_timeout: Duration,
}

impl SerialSettings {
    /// Build the settings from device configuration
    pub fn from_device_config(config: &DeviceConfig) -> Self {
        Self {
            port: config.serial_port.clone(),
            baud_rate: config.baud_rate,
            slave_id: config.slave_id,
            response_timeout: config.response_timeout(),
        }
    }
}

/// Register bus backed by a real serial link
pub struct ModbusRtuBus {
    settings: SerialSettings,
    context: Option<Context>,
    stats: BusStats,
}

impl ModbusRtuBus {
    /// Create a bus for the given settings; the port is not opened yet
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            context: None,
            stats: BusStats::default(),
        }
    }

    fn context_mut(&mut self) -> Result<&mut Context> {
        self.context
            .as_mut()
            .ok_or_else(|| DaqError::Connection("Serial link is not open".to_string()))
    }

    /// Mark the link as broken so the next cycle reopens it
    fn fail(&mut self, err: DaqError) -> DaqError {
        self.stats.record_failure();
        self.context = None;
        err
    }
}

impl RegisterBus for ModbusRtuBus {
    fn connect(&mut self) -> Result<()> {
        self.disconnect();

        let builder = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .timeout(self.settings.response_timeout);

        let context = rtu::connect_slave_with_timeout(
            &builder,
            Slave(self.settings.slave_id),
            Some(self.settings.response_timeout),
        )
        .map_err(|e| {
            DaqError::Connection(format!(
                "Failed to open {} at {} baud: {}",
                self.settings.port, self.settings.baud_rate, e
            ))
        })?;

        self.context = Some(context);
        self.stats.record_connect();
        tracing::debug!(
            "Opened {} at {} baud (slave {})",
            self.settings.port,
            self.settings.baud_rate,
            self.settings.slave_id
        );
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.context.take().is_some() {
            tracing::debug!("Closed {}", self.settings.port);
        }
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let start = Instant::now();
        let result = self.context_mut()?.read_input_registers(address, count);

        match result {
            Ok(Ok(words)) => {
                self.stats
                    .record_success(start.elapsed().as_micros() as u64, words.len() as u64);
                Ok(words)
            }
            Ok(Err(exception)) => Err(self.fail(DaqError::Device(format!(
                "Exception reading {} registers at 0x{:02X}: {:?}",
                count, address, exception
            )))),
            Err(e) => Err(self.fail(DaqError::Device(format!(
                "Failed to read {} registers at 0x{:02X}: {}",
                count, address, e
            )))),
        }
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let start = Instant::now();
        let result = self.context_mut()?.write_single_register(address, value);

        match result {
            Ok(Ok(())) => {
                self.stats.record_success(start.elapsed().as_micros() as u64, 0);
                Ok(())
            }
            Ok(Err(exception)) => Err(self.fail(DaqError::Device(format!(
                "Exception writing register 0x{:02X}: {:?}",
                address, exception
            )))),
            Err(e) => Err(self.fail(DaqError::Device(format!(
                "Failed to write register 0x{:02X}: {}",
                address, e
            )))),
        }
    }

    fn stats(&self) -> &BusStats {
        &self.stats
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} baud, slave {}",
            self.settings.port, self.settings.baud_rate, self.settings.slave_id
        )
    }
}

/// Enumerate candidate serial ports, USB adapters first
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| DaqError::Connection(format!("Failed to enumerate serial ports: {}", e)))?;

    let mut usb = Vec::new();
    let mut other = Vec::new();
    for port in ports {
        match port.port_type {
            tokio_serial::SerialPortType::UsbPort(_) => usb.push(port.port_name),
            _ => other.push(port.port_name),
        }
    }
    usb.sort();
    other.sort();
    usb.extend(other);
    Ok(usb)
}
