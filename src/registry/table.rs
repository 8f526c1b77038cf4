//! Open-addressing probe table backing.
//!
//! Fixed capacity, linear probing with wraparound. An empty slot is the
//! canonical "no record" sentinel, which is why the table can get away with
//! `Option<Tracked>` slots and no tombstones -- but it also means a probe
//! during lookup must walk the whole ring (see [`ProbeTable::remove`]).

use ahash::RandomState;

use super::{Registry, RegistryFull, Tracked};
use crate::config::{TABLE_CAPACITY, TABLE_WARN_THRESHOLD};

pub struct ProbeTable {
    slots: Box<[Option<Tracked>]>,
    hasher: RandomState,
    len: usize,
    warn_at: usize,
}

impl ProbeTable {
    pub fn new() -> Self {
        Self::with_capacity(TABLE_CAPACITY)
    }

    /// A table with a non-default slot count, mainly so the capacity
    /// boundary is testable without a thousand insertions.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "a zero-slot table cannot track anything");
        let warn_at = if capacity == TABLE_CAPACITY {
            TABLE_WARN_THRESHOLD
        } else {
            capacity * 9 / 10
        };
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            hasher: RandomState::new(),
            len: 0,
            warn_at,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Home slot for an address: a well-mixed hash of the pointer bits,
    /// reduced modulo capacity. Identity-only -- nothing about the pointee
    /// is hashed.
    fn home(&self, address: usize) -> usize {
        self.hasher.hash_one(address) as usize % self.slots.len()
    }

    fn warn_if_near_limit(&self) {
        if self.len > self.warn_at {
            log::warn!(
                "nearing allocation tracking limit ({}/{} slots live)",
                self.len,
                self.slots.len()
            );
        }
    }
}

impl Default for ProbeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for ProbeTable {
    fn insert(&mut self, record: Tracked) -> Result<(), RegistryFull> {
        let capacity = self.slots.len();
        let mut slot = self.home(record.address);
        // Bounded probe: at most one full lap. Wrapping back around without
        // finding an empty slot means the table is full.
        for _ in 0..capacity {
            match self.slots[slot] {
                None => {
                    self.slots[slot] = Some(record);
                    self.len += 1;
                    self.warn_if_near_limit();
                    return Ok(());
                }
                Some(live) => {
                    debug_assert!(
                        live.address != record.address,
                        "double insert for address {:#x}",
                        record.address
                    );
                }
            }
            slot = (slot + 1) % capacity;
        }
        log::error!("allocation tracking limit reached ({capacity} slots)");
        Err(RegistryFull)
    }

    fn remove(&mut self, address: usize) -> Option<Tracked> {
        let capacity = self.slots.len();
        let mut slot = self.home(address);
        // Removal clears slots outright (no tombstones), so probe chains
        // that once passed through this slot are broken. Stopping early at
        // the first empty slot would miss records displaced past a hole;
        // walk the full ring instead.
        for _ in 0..capacity {
            if let Some(live) = self.slots[slot] {
                if live.address == address {
                    self.slots[slot] = None;
                    self.len -= 1;
                    return Some(live);
                }
            }
            slot = (slot + 1) % capacity;
        }
        None
    }

    fn contains(&self, address: usize) -> bool {
        let capacity = self.slots.len();
        let mut slot = self.home(address);
        // Same full-ring walk as `remove`: holes in probe chains make the
        // first empty slot an unreliable stopping point.
        for _ in 0..capacity {
            if let Some(live) = self.slots[slot] {
                if live.address == address {
                    return true;
                }
            }
            slot = (slot + 1) % capacity;
        }
        false
    }

    fn drain(&mut self) -> Vec<Tracked> {
        let mut records = Vec::with_capacity(self.len);
        for slot in self.slots.iter_mut() {
            if let Some(record) = slot.take() {
                records.push(record);
            }
        }
        self.len = 0;
        records
    }

    fn usage(&self) -> usize {
        self.warn_if_near_limit();
        self.slots
            .iter()
            .flatten()
            .map(|record| record.size)
            .sum()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn snapshot(&self) -> Vec<Tracked> {
        let mut records: Vec<Tracked> = self.slots.iter().flatten().copied().collect();
        records.sort_unstable_by_key(|record| record.address);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: usize, size: usize) -> Tracked {
        Tracked::new(address, address, size)
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let mut table = ProbeTable::with_capacity(8);
        table.insert(record(0x1000, 40)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.usage(), 40);
        assert_eq!(table.remove(0x1000), Some(record(0x1000, 40)));
        assert_eq!(table.len(), 0);
        assert_eq!(table.usage(), 0);
    }

    #[test]
    fn remove_of_unknown_address_is_clean() {
        let mut table = ProbeTable::with_capacity(8);
        table.insert(record(0x1000, 8)).unwrap();
        assert_eq!(table.remove(0x2000), None);
        // The miss must not have disturbed the live record.
        assert_eq!(table.remove(0x1000), Some(record(0x1000, 8)));
    }

    #[test]
    fn full_table_rejects_without_corrupting() {
        let mut table = ProbeTable::with_capacity(4);
        for i in 0..4 {
            table.insert(record(0x1000 + i * 16, 16)).unwrap();
        }
        assert_eq!(table.insert(record(0x9000, 16)), Err(RegistryFull));
        assert_eq!(table.len(), 4);
        assert_eq!(table.usage(), 64);
        // Removing one entry frees a slot again.
        assert!(table.remove(0x1000).is_some());
        table.insert(record(0x9000, 16)).unwrap();
        assert_eq!(table.remove(0x9000), Some(record(0x9000, 16)));
    }

    #[test]
    fn lookup_survives_probe_chain_holes() {
        // With a single-digit capacity every address collides with
        // something, so removals punch holes in live probe chains. Every
        // survivor must stay findable regardless.
        let mut table = ProbeTable::with_capacity(7);
        let addrs: Vec<usize> = (0..7).map(|i| 0x4000 + i * 32).collect();
        for &addr in &addrs {
            table.insert(record(addr, 32)).unwrap();
        }
        for &addr in addrs.iter().step_by(2) {
            assert!(table.remove(addr).is_some());
        }
        for &addr in addrs.iter().skip(1).step_by(2) {
            assert_eq!(table.remove(addr), Some(record(addr, 32)));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn contains_tracks_liveness_across_probe_holes() {
        let mut table = ProbeTable::with_capacity(4);
        table.insert(record(0x1000, 8)).unwrap();
        table.insert(record(0x2000, 8)).unwrap();
        table.insert(record(0x3000, 8)).unwrap();
        assert!(table.contains(0x2000));
        assert!(!table.contains(0x4000));
        // Punch a hole; the survivors must stay visible.
        table.remove(0x1000);
        assert!(table.contains(0x2000));
        assert!(table.contains(0x3000));
        assert!(!table.contains(0x1000));
    }

    #[test]
    fn drain_empties_and_returns_everything() {
        let mut table = ProbeTable::with_capacity(8);
        for i in 0..5 {
            table.insert(record(0x1000 + i * 8, 8)).unwrap();
        }
        let drained = table.drain();
        assert_eq!(drained.len(), 5);
        assert!(table.is_empty());
        assert_eq!(table.usage(), 0);
        assert!(table.drain().is_empty());
    }

    #[test]
    fn snapshot_is_address_ordered() {
        let mut table = ProbeTable::with_capacity(16);
        for &addr in &[0x5000usize, 0x1000, 0x3000] {
            table.insert(record(addr, 1)).unwrap();
        }
        let snap = table.snapshot();
        let addrs: Vec<usize> = snap.iter().map(|r| r.address).collect();
        assert_eq!(addrs, vec![0x1000, 0x3000, 0x5000]);
    }
}
