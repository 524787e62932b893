//! Port index allocation policies

use super::flow::PortIndex;
use super::flow_table::FlowTable;
use serde::Deserialize;
use std::fmt;

/// How a free index is picked for a new flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationPolicy {
    /// Smallest free index; freed indices are reused first
    #[default]
    LowestFree,
    /// Next free index at or after a rotating cursor
    RoundRobin,
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationPolicy::LowestFree => write!(f, "lowest-free"),
            AllocationPolicy::RoundRobin => write!(f, "round-robin"),
        }
    }
}

/// Picks indices for new flows.
///
/// Holds only the round-robin cursor. Whether an index is free is always
/// read from the table, so an index freed by expiry is visible here as soon
/// as the table has dropped it.
#[derive(Debug, Clone)]
pub struct IndexAllocator {
    policy: AllocationPolicy,
    next: PortIndex,
}

impl IndexAllocator {
    pub fn new(policy: AllocationPolicy) -> Self {
        Self {
            policy,
            next: PortIndex::new(0),
        }
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Return a free index of `table`, or `None` if it is full.
    ///
    /// Does not reserve the index; the caller inserts into `table` next.
    pub fn allocate(&mut self, table: &FlowTable) -> Option<PortIndex> {
        match self.policy {
            AllocationPolicy::LowestFree => table.lowest_free(),
            AllocationPolicy::RoundRobin => {
                let index = table.next_free_from(self.next)?;
                self.next = PortIndex::from_usize(index.as_usize() + 1)
                    .filter(|next| next.as_usize() < table.capacity())
                    .unwrap_or(PortIndex::new(0));
                Some(index)
            }
        }
    }
}

impl Default for IndexAllocator {
    fn default() -> Self {
        Self::new(AllocationPolicy::default())
    }
}
