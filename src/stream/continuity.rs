//! Scan-index continuity checking
//!
//! Every chunk must start exactly where the previous one ended. The first
//! chunk after a [`reset`](ContinuityValidator::reset) is accepted as-is and
//! sets the baseline.

use crate::error::{Result, SweepCtlError};

/// Tracks the next scan index the data channel must deliver
#[derive(Debug, Clone, Default)]
pub struct ContinuityValidator {
    expected_next: Option<u64>,
}

impl ContinuityValidator {
    /// Create a validator that has not seen any chunk
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the baseline; the next chunk is accepted unconditionally
    pub fn reset(&mut self) {
        self.expected_next = None;
    }

    /// Next scan index expected, if a baseline exists
    pub fn expected_next(&self) -> Option<u64> {
        self.expected_next
    }

    /// Check a chunk and, when it is contiguous, advance past it.
    ///
    /// A rejected chunk leaves the expected index unchanged.
    pub fn accept(&mut self, scan_index: u64, scan_count: u64) -> Result<()> {
        if let Some(expected) = self.expected_next {
            if scan_index > expected {
                return Err(SweepCtlError::MissedScans {
                    expected,
                    actual: scan_index,
                    gap: scan_index - expected,
                });
            }
            if scan_index < expected {
                return Err(SweepCtlError::OutOfOrderScans {
                    expected,
                    actual: scan_index,
                });
            }
        }
        let next = scan_index.checked_add(scan_count).ok_or_else(|| {
            SweepCtlError::Serialization(format!(
                "scan range {} + {} overflows the scan index",
                scan_index, scan_count
            ))
        })?;
        self.expected_next = Some(next);
        Ok(())
    }
}
