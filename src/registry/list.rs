//! Singly-linked-list backing.
//!
//! Insertion at head is O(1); removal is an O(n) scan. Unlike the probe
//! table this backing is unbounded, so the near-limit warning fires at an
//! absolute record count rather than a capacity fraction. `count` and
//! `total_size` are cached running totals kept in step on every
//! insert/remove, which makes `usage()` O(1).

use super::{Registry, RegistryFull, Tracked};
use crate::config::LIST_WARN_THRESHOLD;

struct Node {
    record: Tracked,
    next: Option<Box<Node>>,
}

pub struct AllocList {
    head: Option<Box<Node>>,
    count: usize,
    total_size: usize,
    warn_at: usize,
}

impl AllocList {
    pub fn new() -> Self {
        Self::with_warn_threshold(LIST_WARN_THRESHOLD)
    }

    /// A list with a non-default warning threshold, so the warning path is
    /// testable without a thousand insertions.
    pub fn with_warn_threshold(warn_at: usize) -> Self {
        Self {
            head: None,
            count: 0,
            total_size: 0,
            warn_at,
        }
    }

    fn warn_if_near_limit(&self) {
        if self.count > self.warn_at {
            log::warn!(
                "nearing allocation tracking limit ({} records live)",
                self.count
            );
        }
    }
}

impl Default for AllocList {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for AllocList {
    fn insert(&mut self, record: Tracked) -> Result<(), RegistryFull> {
        // Box allocation of the node is the only way this can fail, and the
        // global allocator aborts rather than reporting exhaustion, so
        // insertion into the list always succeeds.
        self.head = Some(Box::new(Node {
            record,
            next: self.head.take(),
        }));
        self.count += 1;
        self.total_size += record.size;
        self.warn_if_near_limit();
        Ok(())
    }

    fn remove(&mut self, address: usize) -> Option<Tracked> {
        let mut link = &mut self.head;
        loop {
            // Decide before unlinking so no borrow is held across the
            // `take()` below.
            let hit = match link {
                None => return None,
                Some(node) => node.record.address == address,
            };
            if hit {
                let node = link.take().expect("checked non-empty above");
                *link = node.next;
                self.count -= 1;
                self.total_size -= node.record.size;
                return Some(node.record);
            }
            link = &mut link.as_mut().expect("checked non-empty above").next;
        }
    }

    fn contains(&self, address: usize) -> bool {
        let mut link = &self.head;
        while let Some(node) = link {
            if node.record.address == address {
                return true;
            }
            link = &node.next;
        }
        false
    }

    fn drain(&mut self) -> Vec<Tracked> {
        let mut records = Vec::with_capacity(self.count);
        let mut head = self.head.take();
        while let Some(mut node) = head {
            records.push(node.record);
            head = node.next.take();
        }
        self.count = 0;
        self.total_size = 0;
        records
    }

    fn usage(&self) -> usize {
        self.warn_if_near_limit();
        self.total_size
    }

    fn len(&self) -> usize {
        self.count
    }

    fn snapshot(&self) -> Vec<Tracked> {
        let mut records = Vec::with_capacity(self.count);
        let mut link = &self.head;
        while let Some(node) = link {
            records.push(node.record);
            link = &node.next;
        }
        records.sort_unstable_by_key(|record| record.address);
        records
    }
}

// The default recursive drop of a long Box chain can blow the stack; unlink
// iteratively instead.
impl Drop for AllocList {
    fn drop(&mut self) {
        let mut head = self.head.take();
        while let Some(mut node) = head {
            head = node.next.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: usize, size: usize) -> Tracked {
        Tracked::new(address, address, size)
    }

    #[test]
    fn running_totals_track_inserts_and_removes() {
        let mut list = AllocList::new();
        list.insert(record(0x1000, 40)).unwrap();
        list.insert(record(0x2000, 16)).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.usage(), 56);
        assert_eq!(list.remove(0x1000), Some(record(0x1000, 40)));
        assert_eq!(list.usage(), 16);
        assert_eq!(list.remove(0x2000), Some(record(0x2000, 16)));
        assert_eq!(list.usage(), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn remove_unknown_leaves_list_intact() {
        let mut list = AllocList::new();
        list.insert(record(0x1000, 8)).unwrap();
        assert_eq!(list.remove(0x2000), None);
        assert_eq!(list.len(), 1);
        assert_eq!(list.usage(), 8);
    }

    #[test]
    fn removal_works_at_head_middle_and_tail() {
        let mut list = AllocList::new();
        for &addr in &[0x1000usize, 0x2000, 0x3000] {
            list.insert(record(addr, 4)).unwrap();
        }
        // Head insertion means 0x3000 is now the head and 0x1000 the tail.
        assert!(list.remove(0x2000).is_some());
        assert!(list.remove(0x3000).is_some());
        assert!(list.remove(0x1000).is_some());
        assert!(list.is_empty());
    }

    #[test]
    fn contains_tracks_liveness() {
        let mut list = AllocList::new();
        list.insert(record(0x1000, 8)).unwrap();
        list.insert(record(0x2000, 8)).unwrap();
        assert!(list.contains(0x1000));
        assert!(list.contains(0x2000));
        assert!(!list.contains(0x3000));
        list.remove(0x1000);
        assert!(!list.contains(0x1000));
        assert!(list.contains(0x2000));
    }

    #[test]
    fn drain_returns_everything_and_resets_totals() {
        let mut list = AllocList::new();
        for i in 0..10 {
            list.insert(record(0x1000 + i * 8, 8)).unwrap();
        }
        let drained = list.drain();
        assert_eq!(drained.len(), 10);
        assert!(list.is_empty());
        assert_eq!(list.usage(), 0);
        assert!(list.drain().is_empty());
    }

    #[test]
    fn snapshot_is_address_ordered() {
        let mut list = AllocList::new();
        for &addr in &[0x5000usize, 0x1000, 0x3000] {
            list.insert(record(addr, 1)).unwrap();
        }
        let addrs: Vec<usize> = list.snapshot().iter().map(|r| r.address).collect();
        assert_eq!(addrs, vec![0x1000, 0x3000, 0x5000]);
    }
}
