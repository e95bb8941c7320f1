//! Shared identifier and time-step types
//!
//! ## Table of Contents
//! - **CellId**: index of a cell in the arena
//! - **TaskId**: index of a task in the task pool
//! - **Rank**: MPI-style rank identifier
//! - **StepTime**: integer power-of-two time on the engine's timeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a cell in the [`crate::cell::CellArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub u32);

impl CellId {
    /// Sentinel for "no cell" (e.g. a cell with no parent).
    pub const NONE: CellId = CellId(u32::MAX);

    /// Whether this id is the `NONE` sentinel.
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell-{}", self.0)
    }
}

impl From<u32> for CellId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Index of a task in the scheduler's task pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

impl From<u32> for TaskId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<usize> for TaskId {
    fn from(v: usize) -> Self {
        Self(v as u32)
    }
}

/// MPI-style rank identifier. `Rank(0)` is always local in single-node mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank(pub i32);

impl Rank {
    /// The rank this process runs as when no transport is configured.
    pub const LOCAL: Rank = Rank(0);
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank-{}", self.0)
    }
}

impl From<i32> for Rank {
    fn from(v: i32) -> Self {
        Self(v)
    }
}

/// Integer time on the engine's power-of-two timeline (§3, §4.5).
///
/// Every particle's next wakeup is a multiple of its own time-bin width;
/// comparing two `StepTime`s is always exact integer comparison, never
/// floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepTime(pub u64);

impl StepTime {
    /// The start of the simulation.
    pub const ZERO: StepTime = StepTime(0);

    /// Smallest strictly-later time reachable from `self` at time-bin `bin`
    /// (bin width is `2^bin`).
    pub fn next(self, bin: u8) -> StepTime {
        let width = 1u64 << bin;
        StepTime((self.0 / width + 1) * width)
    }
}

impl fmt::Display for StepTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_id_none_sentinel() {
        assert!(CellId::NONE.is_none());
        assert!(!CellId(0).is_none());
    }

    #[test]
    fn step_time_next_rounds_up_to_bin_width() {
        let t = StepTime(5);
        assert_eq!(t.next(2).0, 8); // bin width 4: next multiple of 4 after 5
        assert_eq!(StepTime(8).next(2).0, 12);
    }

    #[test]
    fn rank_local_is_zero() {
        assert_eq!(Rank::LOCAL, Rank(0));
    }
}
