// Descriptor arena.
//
// Descriptors are allocated in bulk (fixed-size chunks) and addressed by
// stable index. Chunks are append-only and never freed while the arena
// lives, so a slot reference stays valid for the arena's lifetime and
// neighbor indices can never dangle.

use crate::mem::page::{PageIdx, PageSlot};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Descriptors per chunk.
const CHUNK: usize = 512;

pub struct PageArena {
    chunks: RwLock<Vec<Box<[PageSlot]>>>,
    len: AtomicU32,
}

impl PageArena {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            len: AtomicU32::new(0),
        }
    }

    /// Number of descriptors ever allocated (recycled ones included).
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a fresh descriptor, growing the arena by one chunk when the
    /// current chunks are exhausted.
    pub fn alloc(&self) -> PageIdx {
        let idx = self.len.fetch_add(1, Ordering::AcqRel);
        let needed_chunks = idx as usize / CHUNK + 1;

        if self.chunks.read().len() < needed_chunks {
            let mut chunks = self.chunks.write();
            while chunks.len() < needed_chunks {
                let base = chunks.len() * CHUNK;
                let chunk: Box<[PageSlot]> = (base..base + CHUNK)
                    .map(|i| PageSlot::new(i as u32))
                    .collect();
                chunks.push(chunk);
            }
        }

        PageIdx(idx)
    }

    /// Resolve an index to its descriptor.
    ///
    /// Panics on an index that was never allocated.
    #[inline]
    pub fn slot(&self, idx: PageIdx) -> &PageSlot {
        let i = idx.0 as usize;
        assert!(i < self.len(), "page index {} out of bounds", idx.0);

        let chunks = self.chunks.read();
        let slot: *const PageSlot = &chunks[i / CHUNK][i % CHUNK];
        // SAFETY: chunks are append-only boxed slices; a slot's address never
        // changes and is never freed while the arena lives, so detaching the
        // reference from the read-guard lifetime is sound. The returned
        // borrow is still tied to `&self`.
        unsafe { &*slot }
    }
}

impl Default for PageArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn alloc_assigns_sequential_indices() {
        let arena = PageArena::new();
        for expect in 0..3u32 {
            let idx = arena.alloc();
            assert_eq!(idx, PageIdx(expect));
            assert_eq!(arena.slot(idx).idx(), idx);
        }
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn slots_survive_chunk_growth() {
        let arena = PageArena::new();
        let first = arena.alloc();
        arena.slot(first).meta().va = 0xdead_b000;
        let first_addr = arena.slot(first) as *const _ as usize;

        // Force several chunk allocations.
        for _ in 0..(CHUNK * 3) {
            arena.alloc();
        }

        assert_eq!(arena.slot(first) as *const _ as usize, first_addr);
        assert_eq!(arena.slot(first).meta().va, 0xdead_b000);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn unallocated_index_panics() {
        let arena = PageArena::new();
        arena.alloc();
        arena.slot(PageIdx(1));
    }

    #[test]
    fn concurrent_alloc_yields_unique_indices() {
        let arena = Arc::new(PageArena::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let a = arena.clone();
            handles.push(std::thread::spawn(move || {
                (0..500).map(|_| a.alloc().0).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000);
        assert_eq!(arena.len(), 2000);
    }
}
