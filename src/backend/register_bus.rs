//! RegisterBus trait for a unified register-transport interface
//!
//! This module provides a common trait for register transports, enabling both
//! the real Modbus-RTU serial link and a simulated instrument for testing.

use crate::error::Result;
use std::collections::VecDeque;

/// Size of the rolling window for recent transaction times
const RECENT_WINDOW_SIZE: usize = 100;

/// Statistics for bus transactions
#[derive(Debug, Clone)]
pub struct BusStats {
    /// Total number of successful transactions
    pub successful_transactions: u64,
    /// Total number of failed transactions
    pub failed_transactions: u64,
    /// Total register words read
    pub total_words_read: u64,
    /// Number of times the link was (re)opened
    pub connects: u64,
    /// Last transaction time in microseconds
    pub last_transaction_us: u64,
    /// Rolling window of recent transaction times
    pub recent_transaction_times: VecDeque<u64>,
}

impl Default for BusStats {
    fn default() -> Self {
        Self {
            successful_transactions: 0,
            failed_transactions: 0,
            total_words_read: 0,
            connects: 0,
            last_transaction_us: 0,
            recent_transaction_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl BusStats {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_transactions + self.failed_transactions;
        if total == 0 {
            100.0
        } else {
            (self.successful_transactions as f64 / total as f64) * 100.0
        }
    }

    /// Average of the recent transaction times in microseconds
    pub fn recent_avg_us(&self) -> f64 {
        if self.recent_transaction_times.is_empty() {
            return 0.0;
        }
        self.recent_transaction_times.iter().sum::<u64>() as f64
            / self.recent_transaction_times.len() as f64
    }

    /// Record a successful transaction
    pub fn record_success(&mut self, time_us: u64, words: u64) {
        self.successful_transactions += 1;
        self.total_words_read += words;
        self.last_transaction_us = time_us;

        self.recent_transaction_times.push_back(time_us);
        if self.recent_transaction_times.len() > RECENT_WINDOW_SIZE {
            self.recent_transaction_times.pop_front();
        }
    }

    /// Record a failed transaction
    pub fn record_failure(&mut self) {
        self.failed_transactions += 1;
    }

    /// Record an opened link
    pub fn record_connect(&mut self) {
        self.connects += 1;
    }
}

/// Unified interface for register transports
///
/// Implementations must be `Send` so the client can move into the
/// acquisition thread. A failed transaction is reported as an error and
/// leaves reconnection policy to the caller.
///
/// # Example
///
/// ```ignore
/// fn pending(bus: &mut dyn RegisterBus) -> Result<u16> {
///     Ok(bus.read_input_registers(0x02, 1)?[0])
/// }
/// ```
pub trait RegisterBus: Send {
    /// Open the link to the instrument
    fn connect(&mut self) -> Result<()>;

    /// Close the link; a no-op when already closed
    fn disconnect(&mut self);

    /// Check whether the link is currently open
    fn is_connected(&self) -> bool;

    /// Read `count` input registers starting at `address` in one transaction
    fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Write one holding register
    fn write_register(&mut self, address: u16, value: u16) -> Result<()>;

    /// Get bus statistics
    fn stats(&self) -> &BusStats;

    /// Human-readable description of the link (port, address)
    fn describe(&self) -> String;
}
