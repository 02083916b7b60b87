// Page table: aligned virtual address -> descriptor index.
//
// One coarse mutex; lookups are off the ingestor's fast path (it already
// holds the sample), so partitioning buys nothing here.

use crate::config::BASE_PAGE_SIZE;
use crate::mem::page::PageIdx;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct PageTable {
    map: Mutex<HashMap<u64, PageIdx>>,
    page_mask: u64,
    base_mask: u64,

    lookups: AtomicU64,
    hits: AtomicU64,
}

impl PageTable {
    pub fn new(page_size: u64) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            page_mask: !(page_size - 1),
            base_mask: !(BASE_PAGE_SIZE - 1),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Insert a descriptor under its aligned key. Idempotent: a duplicate key
    /// logs and keeps the existing entry (several sub-page allocations can
    /// round to the same tier-page key).
    pub fn add(&self, va: u64, idx: PageIdx) -> bool {
        let mut map = self.map.lock();
        match map.entry(va) {
            std::collections::hash_map::Entry::Occupied(e) => {
                debug!(va = format_args!("0x{va:x}"), existing = e.get().0, "duplicate page key");
                false
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(idx);
                true
            }
        }
    }

    /// Remove a key; returns the descriptor that was mapped there.
    pub fn remove(&self, va: u64) -> Option<PageIdx> {
        self.map.lock().remove(&va)
    }

    /// Exact-key lookup.
    pub fn get(&self, va: u64) -> Option<PageIdx> {
        self.map.lock().get(&va).copied()
    }

    /// Resolve a sampled address: try the tier-page-aligned key, then the
    /// base-page-aligned key, so samples land on either granularity.
    pub fn find(&self, addr: u64) -> Option<PageIdx> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let map = self.map.lock();
        let found = map
            .get(&(addr & self.page_mask))
            .or_else(|| map.get(&(addr & self.base_mask)))
            .copied();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (lookups, hits) since start.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.lookups.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = 2 * 1024 * 1024;

    #[test]
    fn add_is_idempotent() {
        let table = PageTable::new(PAGE);
        assert!(table.add(PAGE, PageIdx(1)));
        assert!(!table.add(PAGE, PageIdx(2)));
        // First entry wins.
        assert_eq!(table.get(PAGE), Some(PageIdx(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_resolves_tier_page_key() {
        let table = PageTable::new(PAGE);
        table.add(PAGE, PageIdx(4));
        // Anywhere inside the 2 MiB page resolves.
        assert_eq!(table.find(PAGE + 12345), Some(PageIdx(4)));
        assert_eq!(table.find(PAGE + PAGE - 1), Some(PageIdx(4)));
        assert_eq!(table.find(PAGE - 1), None);
    }

    #[test]
    fn find_falls_back_to_base_page_key() {
        let table = PageTable::new(PAGE);
        // A short trailing descriptor keyed at 4 KiB granularity.
        let va = 3 * PAGE + 8 * 4096;
        table.add(va, PageIdx(9));
        assert_eq!(table.find(va + 100), Some(PageIdx(9)));
        // The 2 MiB-aligned key misses; the 4 KiB fallback hits.
        let (lookups, hits) = table.stats();
        assert_eq!((lookups, hits), (1, 1));
    }

    #[test]
    fn remove_unmaps() {
        let table = PageTable::new(PAGE);
        table.add(PAGE, PageIdx(1));
        assert_eq!(table.remove(PAGE), Some(PageIdx(1)));
        assert_eq!(table.remove(PAGE), None);
        assert!(table.is_empty());
    }
}
