//! Read-mode selection
//!
//! The instrument exposes its FIFO through two data registers. Small backlogs
//! are read in one Normal transaction of exactly the pending size; large
//! backlogs are drained through the Bulk register in bursts capped at the
//! device's maximum transfer.
//!
//! All counts here are scalars (register words), not triplets.

use crate::types::CHANNEL_COUNT;

/// Pending counts above this select Bulk mode
pub const BULK_TRIGGER_SIZE: usize = 123;

/// Maximum triplets the instrument returns in one Bulk transaction
pub const MAX_BULK_TRIPLETS: usize = 9;

/// Maximum scalars in one Bulk transaction
pub const MAX_BULK_SCALARS: usize = MAX_BULK_TRIPLETS * CHANNEL_COUNT;

/// Data register used for Normal reads (also the pending-count register)
pub const NORMAL_DATA_REGISTER: u16 = 0x02;

/// Data register used for Bulk reads
pub const BULK_DATA_REGISTER: u16 = 0x15;

/// Which data register a read goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Normal,
    Bulk,
}

impl ReadMode {
    /// Register address of the data source for this mode
    pub fn data_register(&self) -> u16 {
        match self {
            ReadMode::Normal => NORMAL_DATA_REGISTER,
            ReadMode::Bulk => BULK_DATA_REGISTER,
        }
    }
}

impl std::fmt::Display for ReadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadMode::Normal => write!(f, "Normal"),
            ReadMode::Bulk => write!(f, "Bulk"),
        }
    }
}

/// Decision for one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    /// Nothing pending
    Idle,
    /// Read `count` scalars through the Normal register
    Normal { count: usize },
    /// Read `count` scalars (at most [`MAX_BULK_SCALARS`]) through the Bulk register
    Bulk { count: usize },
}

impl ReadPlan {
    /// The mode and scalar count, or `None` when idle
    pub fn request(&self) -> Option<(ReadMode, usize)> {
        match *self {
            ReadPlan::Idle => None,
            ReadPlan::Normal { count } => Some((ReadMode::Normal, count)),
            ReadPlan::Bulk { count } => Some((ReadMode::Bulk, count)),
        }
    }
}

/// Choose the read for a given pending scalar count
pub fn select_mode(pending: usize) -> ReadPlan {
    if pending == 0 {
        ReadPlan::Idle
    } else if pending <= BULK_TRIGGER_SIZE {
        ReadPlan::Normal { count: pending }
    } else {
        ReadPlan::Bulk {
            count: pending.min(MAX_BULK_SCALARS),
        }
    }
}

/// Whether a Bulk drain should issue another burst for the reported backlog
pub fn bulk_backlog_remains(remaining: usize) -> bool {
    remaining > BULK_TRIGGER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_when_nothing_pending() {
        assert_eq!(select_mode(0), ReadPlan::Idle);
        assert_eq!(select_mode(0).request(), None);
    }

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(select_mode(123), ReadPlan::Normal { count: 123 });
        assert_eq!(select_mode(124), ReadPlan::Bulk { count: 27 });
        assert_eq!(select_mode(1), ReadPlan::Normal { count: 1 });
    }

    #[test]
    fn test_bulk_cap() {
        assert_eq!(select_mode(5000), ReadPlan::Bulk { count: MAX_BULK_SCALARS });
        assert_eq!(MAX_BULK_SCALARS, 27);
    }

    #[test]
    fn test_registers() {
        assert_eq!(ReadMode::Normal.data_register(), 0x02);
        assert_eq!(ReadMode::Bulk.data_register(), 0x15);
        assert_eq!(
            select_mode(200).request(),
            Some((ReadMode::Bulk, 27))
        );
    }

    #[test]
    fn test_bulk_backlog_threshold() {
        assert!(bulk_backlog_remains(124));
        assert!(!bulk_backlog_remains(123));
        assert!(!bulk_backlog_remains(0));
    }

    // Property-based tests using proptest
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_small_backlogs_read_exactly(pending in 1usize..=BULK_TRIGGER_SIZE) {
            prop_assert_eq!(select_mode(pending), ReadPlan::Normal { count: pending });
        }

        #[test]
        fn test_large_backlogs_never_exceed_burst(pending in (BULK_TRIGGER_SIZE + 1)..100_000usize) {
            match select_mode(pending) {
                ReadPlan::Bulk { count } => {
                    prop_assert!(count <= MAX_BULK_SCALARS);
                    prop_assert_eq!(count % CHANNEL_COUNT, 0);
                }
                other => prop_assert!(false, "expected Bulk, got {:?}", other),
            }
        }
    }
}
