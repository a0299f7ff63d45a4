//! Simulated instrument for testing and `--mock` runs
//!
//! [`MockDevice`] implements [`RegisterBus`] on top of an in-memory FIFO with
//! the same register map as the real instrument:
//!
//! | Address | Read | Write |
//! |---|---|---|
//! | `0x01` | sample rate | sample rate |
//! | `0x02` | `[pending]` for one word, `[remaining, payload...]` otherwise | - |
//! | `0x15` | `[remaining, payload...]` | - |
//! | `0x80` | 3-word chip identity | - |
//!
//! The FIFO is filled either by a waveform generator running at the
//! configured sample rate, or explicitly through a [`MockDeviceHandle`].
//! The handle also injects failures so tests can drive reconnects.

use super::read_mode::{BULK_DATA_REGISTER, NORMAL_DATA_REGISTER};
use super::register_bus::{BusStats, RegisterBus};
use super::register_client::{REG_CHIP_ID, REG_SAMPLE_RATE};
use crate::error::{DaqError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Chip identity reported by the simulated instrument
pub const MOCK_CHIP_ID: [u16; 3] = [0x5657, 0x0001, 0x0203];

/// Upper bound on buffered words, like the instrument's hardware FIFO
pub const MOCK_FIFO_CAPACITY: usize = 65_535;

/// Waveform produced by the built-in generator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockWaveform {
    /// Sine on X, cosine on Y, half-amplitude sine on Z
    Sine { frequency_hz: f64, amplitude: f64 },
    /// Triplet counter: X = n, Y = n + 1, Z = n + 2 (raw counts)
    Counter,
}

impl Default for MockWaveform {
    fn default() -> Self {
        MockWaveform::Sine {
            frequency_hz: 50.0,
            amplitude: 1.0,
        }
    }
}

#[derive(Debug)]
struct Generator {
    waveform: MockWaveform,
    started: Instant,
    produced: u64,
}

#[derive(Debug)]
struct MockState {
    fifo: VecDeque<u16>,
    sample_rate: u16,
    chip_id: [u16; 3],
    generator: Option<Generator>,
    fail_connects: u32,
    fail_reads: u32,
    /// Words to drop from the next data payload (simulated short response)
    truncate_next: usize,
    /// Successful connects so far
    connect_count: u64,
}

impl MockState {
    fn new() -> Self {
        Self {
            fifo: VecDeque::new(),
            sample_rate: 7812,
            chip_id: MOCK_CHIP_ID,
            generator: None,
            fail_connects: 0,
            fail_reads: 0,
            truncate_next: 0,
            connect_count: 0,
        }
    }

    /// Advance the generator to "now" and enqueue the triplets it owes
    fn refill(&mut self) {
        let rate = self.sample_rate.max(1) as f64;
        let Some(generator) = self.generator.as_mut() else {
            return;
        };
        let due = (generator.started.elapsed().as_secs_f64() * rate) as u64;
        while generator.produced < due && self.fifo.len() + 3 <= MOCK_FIFO_CAPACITY {
            let n = generator.produced;
            let words = match generator.waveform {
                MockWaveform::Sine {
                    frequency_hz,
                    amplitude,
                } => {
                    let phase = 2.0 * std::f64::consts::PI * frequency_hz * n as f64 / rate;
                    [
                        to_raw(amplitude * phase.sin()),
                        to_raw(amplitude * phase.cos()),
                        to_raw(0.5 * amplitude * phase.sin()),
                    ]
                }
                MockWaveform::Counter => {
                    let base = (n * 3) as u16;
                    [base, base.wrapping_add(1), base.wrapping_add(2)]
                }
            };
            self.fifo.extend(words);
            generator.produced += 1;
        }
    }

    fn pending(&self) -> u16 {
        self.fifo.len().min(u16::MAX as usize) as u16
    }

    /// Pop up to `count` payload words, returning `[remaining, payload...]`
    fn read_with_header(&mut self, count: usize) -> Vec<u16> {
        let take = count.min(self.fifo.len());
        let mut payload: Vec<u16> = self.fifo.drain(..take).collect();
        // The instrument pads a short FIFO with zeros
        payload.resize(count, 0);

        if self.truncate_next > 0 {
            let keep = payload.len().saturating_sub(self.truncate_next);
            payload.truncate(keep);
            self.truncate_next = 0;
        }

        let mut response = Vec::with_capacity(payload.len() + 1);
        response.push(self.pending());
        response.extend(payload);
        response
    }
}

fn to_raw(value: f64) -> u16 {
    let scaled = (value * crate::types::RAW_SCALE).round();
    scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16 as u16
}

/// Test-side handle to a [`MockDevice`]'s internal state
#[derive(Clone)]
pub struct MockDeviceHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockDeviceHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append raw words to the FIFO
    pub fn push_words(&self, words: &[u16]) {
        self.lock().fifo.extend(words.iter().copied());
    }

    /// Words currently waiting in the FIFO
    pub fn pending(&self) -> usize {
        self.lock().fifo.len()
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Make the next `n` register reads fail with an I/O error
    pub fn fail_next_reads(&self, n: u32) {
        self.lock().fail_reads = n;
    }

    /// Drop `n` words from the next data response
    pub fn truncate_next_response(&self, n: usize) {
        self.lock().truncate_next = n;
    }

    /// Current value of the sample-rate register
    pub fn sample_rate(&self) -> u16 {
        self.lock().sample_rate
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> u64 {
        self.lock().connect_count
    }

    /// A new, disconnected bus onto the same simulated instrument
    pub fn device(&self) -> MockDevice {
        MockDevice {
            state: Arc::clone(&self.state),
            connected: false,
            stats: BusStats::default(),
        }
    }
}

/// Simulated instrument implementing [`RegisterBus`]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    connected: bool,
    stats: BusStats,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create an instrument with an empty FIFO and no generator
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
            connected: false,
            stats: BusStats::default(),
        }
    }

    /// Produce samples continuously at the configured sample rate
    pub fn with_generator(self, waveform: MockWaveform) -> Self {
        self.lock().generator = Some(Generator {
            waveform,
            started: Instant::now(),
            produced: 0,
        });
        self
    }

    /// Get a handle for feeding data and injecting faults
    pub fn handle(&self) -> MockDeviceHandle {
        MockDeviceHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_link(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DaqError::Connection("Mock device is not connected".to_string()))
        }
    }
}

impl RegisterBus for MockDevice {
    fn connect(&mut self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                drop(state);
                self.connected = false;
                return Err(DaqError::Connection("Mock device refused connection".to_string()));
            }
            state.connect_count += 1;
        }
        self.connected = true;
        self.stats.record_connect();
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.check_link()?;
        let start = Instant::now();

        let response = {
            let mut state = self.lock();
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                None
            } else {
                state.refill();
                let count = count as usize;
                Some(match address {
                    REG_CHIP_ID => state.chip_id.iter().copied().take(count).collect(),
                    REG_SAMPLE_RATE => vec![state.sample_rate],
                    NORMAL_DATA_REGISTER if count == 1 => vec![state.pending()],
                    NORMAL_DATA_REGISTER | BULK_DATA_REGISTER => {
                        state.read_with_header(count.saturating_sub(1))
                    }
                    other => {
                        return Err(DaqError::Device(format!(
                            "Illegal data address 0x{:02X}",
                            other
                        )))
                    }
                })
            }
        };

        match response {
            Some(words) => {
                self.stats
                    .record_success(start.elapsed().as_micros() as u64, words.len() as u64);
                Ok(words)
            }
            None => {
                self.stats.record_failure();
                self.connected = false;
                Err(DaqError::Device("Simulated I/O failure".to_string()))
            }
        }
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.check_link()?;
        if address != REG_SAMPLE_RATE {
            return Err(DaqError::Device(format!(
                "Illegal write address 0x{:02X}",
                address
            )));
        }
        self.lock().sample_rate = value;
        self.stats.record_success(0, 0);
        Ok(())
    }

    fn stats(&self) -> &BusStats {
        &self.stats
    }

    fn describe(&self) -> String {
        "mock instrument".to_string()
    }
}
