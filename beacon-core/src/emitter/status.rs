//! Delivery outcomes reported to request callbacks

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Outcome of one delivery attempt for a group of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmitStatus {
    /// The collector accepted the events
    Success,
    /// Delivery failed; the events stay queued
    FailedWillRetry,
    /// Delivery failed; the events were dropped
    FailedWontRetry,
}

impl EmitStatus {
    fn bit(self) -> u8 {
        match self {
            EmitStatus::Success => 0b001,
            EmitStatus::FailedWillRetry => 0b010,
            EmitStatus::FailedWontRetry => 0b100,
        }
    }
}

impl fmt::Display for EmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmitStatus::Success => "success",
            EmitStatus::FailedWillRetry => "failed_will_retry",
            EmitStatus::FailedWontRetry => "failed_wont_retry",
        };
        f.write_str(name)
    }
}

/// Set of statuses a callback subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmitStatusMask(u8);

impl EmitStatusMask {
    pub const NONE: EmitStatusMask = EmitStatusMask(0);
    pub const ALL: EmitStatusMask = EmitStatusMask(0b111);
    /// Both failure statuses
    pub const FAILURES: EmitStatusMask = EmitStatusMask(0b110);

    pub fn contains(self, status: EmitStatus) -> bool {
        self.0 & status.bit() != 0
    }
}

impl From<EmitStatus> for EmitStatusMask {
    fn from(status: EmitStatus) -> Self {
        EmitStatusMask(status.bit())
    }
}

impl BitOr for EmitStatus {
    type Output = EmitStatusMask;

    fn bitor(self, rhs: EmitStatus) -> EmitStatusMask {
        EmitStatusMask(self.bit() | rhs.bit())
    }
}

impl BitOr<EmitStatus> for EmitStatusMask {
    type Output = EmitStatusMask;

    fn bitor(self, rhs: EmitStatus) -> EmitStatusMask {
        EmitStatusMask(self.0 | rhs.bit())
    }
}

impl BitOr for EmitStatusMask {
    type Output = EmitStatusMask;

    fn bitor(self, rhs: EmitStatusMask) -> EmitStatusMask {
        EmitStatusMask(self.0 | rhs.0)
    }
}

/// Receives the event ids of one delivery outcome.
///
/// Runs on its own thread; it may block or panic without affecting delivery.
pub type EmitterCallback = Arc<dyn Fn(Vec<String>, EmitStatus) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_membership() {
        let mask = EmitStatus::Success | EmitStatus::FailedWontRetry;
        assert!(mask.contains(EmitStatus::Success));
        assert!(!mask.contains(EmitStatus::FailedWillRetry));
        assert!(mask.contains(EmitStatus::FailedWontRetry));

        assert!(EmitStatusMask::FAILURES.contains(EmitStatus::FailedWillRetry));
        assert!(!EmitStatusMask::NONE.contains(EmitStatus::Success));
        assert_eq!(
            EmitStatusMask::from(EmitStatus::Success) | EmitStatusMask::FAILURES,
            EmitStatusMask::ALL
        );
    }
}
