//! Expiring bidirectional flow table
//!
//! Maps an internal [`FlowKey`] to the [`PortIndex`] it was given, and back.
//! Four structures are kept in step:
//!
//! - `slots`: entry per index, O(1) lookup on the return path
//! - `by_key`: key -> index, O(1) lookup on the forward path
//! - `by_age`: (last_seen, index), oldest first, so expiry only walks the
//!   entries it removes
//! - `free`: unoccupied indices, queried by the allocator
//!
//! An index is either in `free` or owned by exactly one entry. Entries are
//! removed by age only; a full table rejects, it never evicts.

use super::flow::{FlowEntry, FlowKey, PortIndex, Timestamp};
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::trace;

/// Largest table: one slot per 16-bit port
pub const MAX_CAPACITY: usize = 1 << 16;

pub struct FlowTable {
    slots: Vec<Option<FlowEntry>>,
    by_key: HashMap<FlowKey, PortIndex>,
    by_age: BTreeSet<(Timestamp, PortIndex)>,
    free: BTreeSet<PortIndex>,
}

impl FlowTable {
    /// Create an empty table with `capacity` slots
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity > MAX_CAPACITY {
            return Err(Error::Flow(format!(
                "capacity {} exceeds {}",
                capacity, MAX_CAPACITY
            )));
        }

        let free = (0..capacity).filter_map(PortIndex::from_usize).collect();

        Ok(Self {
            slots: vec![None; capacity],
            by_key: HashMap::with_capacity(capacity.min(4096)),
            by_age: BTreeSet::new(),
            free,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of entries currently stored
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn lookup_by_key(&self, key: &FlowKey) -> Option<(PortIndex, &FlowEntry)> {
        let index = *self.by_key.get(key)?;
        self.lookup_by_index(index).map(|entry| (index, entry))
    }

    pub fn lookup_by_index(&self, index: PortIndex) -> Option<&FlowEntry> {
        self.slots.get(index.as_usize())?.as_ref()
    }

    pub fn is_occupied(&self, index: PortIndex) -> bool {
        self.lookup_by_index(index).is_some()
    }

    /// Add a flow at a free index.
    ///
    /// Fails without touching the table if `index` is out of range or owned,
    /// or if `key` already has an entry.
    pub fn insert(&mut self, key: FlowKey, index: PortIndex, now: Timestamp) -> Result<()> {
        match self.slots.get(index.as_usize()) {
            None => {
                return Err(Error::Flow(format!(
                    "index {} out of range (capacity {})",
                    index,
                    self.capacity()
                )))
            }
            Some(Some(_)) => return Err(Error::Flow(format!("index {} already in use", index))),
            Some(None) => {}
        }
        if self.by_key.contains_key(&key) {
            return Err(Error::Flow(format!("flow {} already present", key)));
        }

        self.free.remove(&index);
        self.by_key.insert(key, index);
        self.by_age.insert((now, index));
        self.slots[index.as_usize()] = Some(FlowEntry {
            key,
            index,
            last_seen: now,
            created_at: now,
        });
        Ok(())
    }

    /// Mark the entry at `index` as seen at `now`.
    ///
    /// `last_seen` never moves backwards. Returns false if there is no entry.
    pub fn refresh(&mut self, index: PortIndex, now: Timestamp) -> bool {
        let Some(Some(entry)) = self.slots.get_mut(index.as_usize()) else {
            return false;
        };

        if now > entry.last_seen {
            self.by_age.remove(&(entry.last_seen, index));
            entry.last_seen = now;
            self.by_age.insert((now, index));
        }
        true
    }

    /// Remove the entry at `index`, freeing the index immediately
    pub fn remove(&mut self, index: PortIndex) -> Option<FlowEntry> {
        let entry = self.slots.get_mut(index.as_usize())?.take()?;
        self.by_key.remove(&entry.key);
        self.by_age.remove(&(entry.last_seen, index));
        self.free.insert(index);
        Some(entry)
    }

    /// Remove every entry with `last_seen < threshold`; returns the freed indices
    pub fn expire_before(&mut self, threshold: Timestamp) -> Vec<PortIndex> {
        self.expire_while(|last_seen| last_seen < threshold)
    }

    /// Remove every entry that is no longer live at `now`, i.e.
    /// `now - last_seen >= idle_timeout`.
    pub fn expire_idle(&mut self, now: Timestamp, idle_timeout: Duration) -> Vec<PortIndex> {
        self.expire_while(|last_seen| now.duration_since(last_seen) >= idle_timeout)
    }

    fn expire_while(&mut self, stale: impl Fn(Timestamp) -> bool) -> Vec<PortIndex> {
        let mut freed = Vec::new();

        while let Some(&(last_seen, index)) = self.by_age.first() {
            if !stale(last_seen) {
                break;
            }
            if let Some(entry) = self.remove(index) {
                trace!(flow = %entry.key, index = %index, "flow expired");
            }
            freed.push(index);
        }

        freed
    }

    /// Smallest unoccupied index
    pub fn lowest_free(&self) -> Option<PortIndex> {
        self.free.first().copied()
    }

    /// First unoccupied index at or after `start`, wrapping around
    pub fn next_free_from(&self, start: PortIndex) -> Option<PortIndex> {
        self.free
            .range(start..)
            .next()
            .or_else(|| self.free.first())
            .copied()
    }

    /// Live entries in index order
    pub fn iter(&self) -> impl Iterator<Item = &FlowEntry> {
        self.slots.iter().flatten()
    }

    /// Panics if the internal structures disagree; test support.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.by_key.len(), self.by_age.len());
        assert_eq!(self.by_key.len() + self.free.len(), self.capacity());

        for (key, index) in &self.by_key {
            let entry = self.lookup_by_index(*index).expect("indexed slot is empty");
            assert_eq!(&entry.key, key);
            assert_eq!(entry.index, *index);
            assert!(self.by_age.contains(&(entry.last_seen, *index)));
            assert!(!self.free.contains(index));
        }
        for index in &self.free {
            assert!(self.lookup_by_index(*index).is_none());
        }
    }
}
