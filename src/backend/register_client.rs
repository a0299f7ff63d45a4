//! Register client for the vibration instrument
//!
//! Wraps a [`RegisterBus`] with the instrument's register map and the
//! connection policy of the acquisition loop:
//!
//! - every data read carries a header word with the remaining backlog,
//!   fetched in the same transaction as the payload
//! - any failed or malformed transaction drops the link
//! - [`RegisterClient::ensure_connected`] reopens it with bounded retries and
//!   bumps a generation counter, so the caller can discard partial triplets
//!   that straddle the gap

use super::modbus_rtu::{ModbusRtuBus, SerialSettings};
use super::read_mode::{ReadMode, NORMAL_DATA_REGISTER};
use super::register_bus::{BusStats, RegisterBus};
use super::retry::RetryPolicy;
use crate::config::DeviceConfig;
use crate::error::{DaqError, Result};
use std::time::{Duration, Instant};

/// Sample-rate register (read/write)
pub const REG_SAMPLE_RATE: u16 = 0x01;

/// Pending-sample-count register
pub const REG_PENDING_COUNT: u16 = NORMAL_DATA_REGISTER;

/// Chip-identity register
pub const REG_CHIP_ID: u16 = 0x80;

/// Number of words in the chip identity
pub const CHIP_ID_WORDS: u16 = 3;

/// Largest register count a single Modbus read may request
pub const MAX_REGISTERS_PER_READ: usize = 125;

/// Result of one framed data read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRead {
    /// Backlog the device reported after serving this read, in scalars
    pub remaining: usize,
    /// Payload words in device order
    pub words: Vec<u16>,
}

/// High-level access to the instrument's registers
pub struct RegisterClient {
    bus: Box<dyn RegisterBus>,
    retry: RetryPolicy,
    probe_timeout: Duration,
    generation: u64,
}

impl RegisterClient {
    /// Create a client over an arbitrary bus
    pub fn new(bus: Box<dyn RegisterBus>) -> Self {
        Self {
            bus,
            retry: RetryPolicy::default(),
            probe_timeout: Duration::from_millis(500),
            generation: 0,
        }
    }

    /// Create a client over the serial link described by the configuration
    pub fn from_device_config(config: &DeviceConfig) -> Self {
        let bus = ModbusRtuBus::new(SerialSettings::from_device_config(config));
        Self::new(Box::new(bus)).with_probe_timeout(config.probe_timeout())
    }

    /// Use a different reconnect policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound the identification probe run at connect
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Open the link and confirm the instrument answers
    ///
    /// The link is closed again if the identity read fails or takes longer
    /// than the probe timeout.
    pub fn connect(&mut self) -> Result<()> {
        self.bus.connect()?;

        let start = Instant::now();
        let probe = self.read_chip_id();
        let elapsed = start.elapsed();

        match probe {
            Ok(id) if elapsed <= self.probe_timeout => {
                self.generation += 1;
                tracing::info!(
                    "Connected to {} (chip id {:04X}-{:04X}-{:04X})",
                    self.bus.describe(),
                    id[0],
                    id[1],
                    id[2]
                );
                Ok(())
            }
            Ok(_) => {
                self.bus.disconnect();
                Err(DaqError::Connection(format!(
                    "{} answered the identification probe after {:?} (limit {:?})",
                    self.bus.describe(),
                    elapsed,
                    self.probe_timeout
                )))
            }
            Err(e) => {
                self.bus.disconnect();
                Err(DaqError::Connection(format!(
                    "{} did not answer the identification probe: {}",
                    self.bus.describe(),
                    e
                )))
            }
        }
    }

    /// Close the link
    pub fn disconnect(&mut self) {
        self.bus.disconnect();
    }

    /// Whether the link is currently open
    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    /// Incremented on every successful (re)connect
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bus statistics
    pub fn stats(&self) -> &BusStats {
        self.bus.stats()
    }

    /// Description of the underlying link
    pub fn describe(&self) -> String {
        self.bus.describe()
    }

    /// Reopen the link if it is down
    ///
    /// Returns `false` when the link could not be restored; the caller treats
    /// that as "no data this cycle".
    pub fn ensure_connected(&mut self) -> bool {
        if self.bus.is_connected() {
            return true;
        }

        let retry = self.retry;
        match retry.run("Reconnect", |_| self.connect()) {
            Ok(()) => {
                tracing::info!("Link restored (generation {})", self.generation);
                true
            }
            Err(e) => {
                tracing::warn!("Link still down: {}", e);
                false
            }
        }
    }

    /// Read the three-word chip identity
    pub fn read_chip_id(&mut self) -> Result<[u16; 3]> {
        let words = self.bus.read_input_registers(REG_CHIP_ID, CHIP_ID_WORDS)?;
        match words.as_slice() {
            [a, b, c] => Ok([*a, *b, *c]),
            other => Err(DaqError::Device(format!(
                "Chip identity has {} words, expected {}",
                other.len(),
                CHIP_ID_WORDS
            ))),
        }
    }

    /// Program the sample rate and return the rate the device confirms
    pub fn init_device(&mut self, sample_rate_hz: u32) -> Result<u32> {
        let id = self.read_chip_id()?;
        tracing::debug!("Chip identity: {:04X?}", id);

        let rate = u16::try_from(sample_rate_hz).map_err(|_| {
            DaqError::Config(format!(
                "Sample rate {} does not fit the rate register",
                sample_rate_hz
            ))
        })?;
        self.bus.write_register(REG_SAMPLE_RATE, rate)?;

        let confirmed = self
            .bus
            .read_input_registers(REG_SAMPLE_RATE, 1)?
            .first()
            .copied()
            .ok_or_else(|| DaqError::Device("Empty sample-rate response".to_string()))?;

        if confirmed != rate {
            tracing::warn!(
                "Device confirmed sample rate {} Hz instead of {} Hz",
                confirmed,
                rate
            );
        } else {
            tracing::debug!("Sample rate set to {} Hz", confirmed);
        }
        Ok(confirmed as u32)
    }

    /// Number of scalars waiting in the device FIFO
    pub fn read_pending_count(&mut self) -> Result<usize> {
        let words = self.bus.read_input_registers(REG_PENDING_COUNT, 1)?;
        words
            .first()
            .map(|&w| w as usize)
            .ok_or_else(|| self.malformed("Empty pending-count response".to_string()))
    }

    /// Read `count` scalars through the data register for `mode`
    ///
    /// The request covers `count + 1` words; word 0 is the backlog header and
    /// the rest is payload. A response of any other length is a malformed
    /// frame and drops the link.
    pub fn read_samples(&mut self, mode: ReadMode, count: usize) -> Result<RawRead> {
        if count == 0 {
            return Ok(RawRead {
                remaining: 0,
                words: Vec::new(),
            });
        }
        if count + 1 > MAX_REGISTERS_PER_READ {
            return Err(DaqError::Device(format!(
                "{} read of {} scalars exceeds one transaction",
                mode, count
            )));
        }

        let expected = count + 1;
        let response = self
            .bus
            .read_input_registers(mode.data_register(), expected as u16)?;

        if response.len() != expected {
            return Err(self.malformed(format!(
                "{} read returned {} words, expected {}",
                mode,
                response.len(),
                expected
            )));
        }

        Ok(RawRead {
            remaining: response[0] as usize,
            words: response[1..].to_vec(),
        })
    }

    fn malformed(&mut self, message: String) -> DaqError {
        self.bus.disconnect();
        DaqError::Device(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_device::{MockDevice, MockDeviceHandle};

    fn client() -> (RegisterClient, MockDeviceHandle) {
        let device = MockDevice::new();
        let handle = device.handle();
        let client = RegisterClient::new(Box::new(device))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
        (client, handle)
    }

    #[test]
    fn test_connect_probes_identity() {
        let (mut client, _handle) = client();
        assert_eq!(client.generation(), 0);
        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.generation(), 1);
    }

    #[test]
    fn test_connect_fails_when_probe_fails() {
        let (mut client, handle) = client();
        handle.fail_next_reads(1);
        let err = client.connect().unwrap_err();
        assert!(matches!(err, DaqError::Connection(_)));
        assert!(!client.is_connected());
        assert_eq!(client.generation(), 0);
    }

    #[test]
    fn test_init_device_confirms_rate() {
        let (mut client, handle) = client();
        client.connect().unwrap();
        assert_eq!(client.init_device(3906).unwrap(), 3906);
        assert_eq!(handle.sample_rate(), 3906);
        assert!(client.init_device(70_000).is_err());
    }

    #[test]
    fn test_framed_read_splits_header() {
        let (mut client, handle) = client();
        client.connect().unwrap();
        handle.push_words(&[10, 11, 12, 13, 14, 15, 16]);

        assert_eq!(client.read_pending_count().unwrap(), 7);
        let read = client.read_samples(ReadMode::Normal, 6).unwrap();
        assert_eq!(read.words, vec![10, 11, 12, 13, 14, 15]);
        assert_eq!(read.remaining, 1);
    }

    #[test]
    fn test_short_frame_is_malformed_and_drops_link() {
        let (mut client, handle) = client();
        client.connect().unwrap();
        handle.push_words(&[1, 2, 3]);
        handle.truncate_next_response(1);

        let err = client.read_samples(ReadMode::Normal, 3).unwrap_err();
        assert!(matches!(err, DaqError::Device(_)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_oversized_request_rejected() {
        let (mut client, _handle) = client();
        client.connect().unwrap();
        assert!(client.read_samples(ReadMode::Normal, 200).is_err());
        assert!(client.read_samples(ReadMode::Bulk, 0).unwrap().words.is_empty());
    }

    #[test]
    fn test_ensure_connected_bumps_generation() {
        let (mut client, handle) = client();
        client.connect().unwrap();
        assert!(client.ensure_connected());
        assert_eq!(client.generation(), 1);

        handle.fail_next_reads(1);
        assert!(client.read_pending_count().is_err());
        assert!(!client.is_connected());

        assert!(client.ensure_connected());
        assert_eq!(client.generation(), 2);
    }

    #[test]
    fn test_ensure_connected_gives_up_after_retries() {
        let (mut client, handle) = client();
        handle.fail_next_connects(3);
        assert!(!client.ensure_connected());
        assert_eq!(client.generation(), 0);

        // The fourth connect succeeds
        assert!(client.ensure_connected());
        assert_eq!(handle.connect_count(), 1);
    }
}
