//! Process-group context.
//!
//! Backend calls are collective: every member issues the same sequence.
//! The native backend runs as a single-member group, so this is only the
//! rank bookkeeping the driver needs for artifact names and leader-only
//! output.

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    rank: usize,
    size: usize,
}

impl ProcessGroup {
    pub fn new(rank: usize, size: usize) -> Result<Self, ConfigError> {
        if rank >= size {
            return Err(ConfigError::InvalidParameter {
                name: "rank",
                reason: format!("rank {rank} outside a group of {size}"),
            });
        }
        Ok(Self { rank, size })
    }

    /// Group with one member.
    pub fn single() -> Self {
        Self { rank: 0, size: 1 }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Rank 0 prints summaries and the terminal error report.
    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

impl Default for ProcessGroup {
    fn default() -> Self {
        Self::single()
    }
}
