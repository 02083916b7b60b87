// Page descriptor: the unit of management.
//
// Flags and cohort links are atomics so the ingestor can classify without
// blocking behind the migrator; the compound state (addresses, counters,
// neighbors) lives behind the per-page mutex. Link fields are only mutated
// under the owning cohort's lock.

use crate::config::MAX_NEIGHBORS;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Sentinel for "no page" in intrusive links.
pub const NIL: u32 = u32::MAX;

/// Stable handle into the descriptor arena. Descriptors are never freed
/// (only recycled), so a `PageIdx` can never dangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageIdx(pub u32);

/// Physical placement of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tier {
    Dram = 0,
    Rem = 1,
}

impl Tier {
    #[inline]
    pub fn node(self) -> u32 {
        match self {
            Tier::Dram => crate::sys::numa::DRAM_NODE,
            Tier::Rem => crate::sys::numa::REM_NODE,
        }
    }

    #[inline]
    fn from_u8(v: u8) -> Tier {
        if v == Tier::Dram as u8 {
            Tier::Dram
        } else {
            Tier::Rem
        }
    }
}

/// Cohort membership tag; agrees with the intrusive links (I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cohort {
    None = 0,
    Hot = 1,
    Cold = 2,
    Free = 3,
}

impl Cohort {
    #[inline]
    fn from_u8(v: u8) -> Cohort {
        match v {
            1 => Cohort::Hot,
            2 => Cohort::Cold,
            3 => Cohort::Free,
            _ => Cohort::None,
        }
    }
}

/// One predicted-neighbor entry: `(peer, distance, time_diff)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborSlot {
    pub page: Option<PageIdx>,
    pub distance: f64,
    pub time_diff: u64,
}

/// Compound page state, guarded by the per-page mutex.
#[derive(Debug)]
pub struct PageMeta {
    /// Tier-page-aligned virtual address; primary key in the page table.
    pub va: u64,
    /// Unaligned base of the covered range.
    pub va_start: u64,
    /// Covered bytes; a multiple of the base page size, normally one tier
    /// page, possibly shorter for the trailing descriptor of an allocation.
    pub size: u64,
    /// Access counter, decayed by cooling.
    pub accesses: u64,
    /// Last cooling epoch applied to this page.
    pub local_clock: u64,
    /// Cycle timestamp of the most recent sample.
    pub cyc_accessed: u64,
    /// Instruction pointer of the most recent sample.
    pub ip: u64,
    /// Bounded neighbor set maintained by the predictor.
    pub neighbors: [NeighborSlot; MAX_NEIGHBORS],
}

impl PageMeta {
    fn empty() -> Self {
        Self {
            va: 0,
            va_start: 0,
            size: 0,
            accesses: 0,
            local_clock: 0,
            cyc_accessed: 0,
            ip: 0,
            neighbors: [NeighborSlot::default(); MAX_NEIGHBORS],
        }
    }
}

/// Page descriptor slot in the arena.
pub struct PageSlot {
    idx: u32,

    tier: AtomicU8,
    hot: AtomicBool,
    free: AtomicBool,
    migrating: AtomicBool,
    migrated: AtomicBool,

    cohort: AtomicU8,
    pub(crate) prev: AtomicU32,
    pub(crate) next: AtomicU32,

    meta: Mutex<PageMeta>,
}

impl PageSlot {
    pub fn new(idx: u32) -> Self {
        Self {
            idx,
            tier: AtomicU8::new(Tier::Dram as u8),
            hot: AtomicBool::new(false),
            free: AtomicBool::new(false),
            migrating: AtomicBool::new(false),
            migrated: AtomicBool::new(false),
            cohort: AtomicU8::new(Cohort::None as u8),
            prev: AtomicU32::new(NIL),
            next: AtomicU32::new(NIL),
            meta: Mutex::new(PageMeta::empty()),
        }
    }

    #[inline]
    pub fn idx(&self) -> PageIdx {
        PageIdx(self.idx)
    }

    #[inline]
    pub fn tier(&self) -> Tier {
        Tier::from_u8(self.tier.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_tier(&self, tier: Tier) {
        self.tier.store(tier as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_hot(&self) -> bool {
        self.hot.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_hot(&self, hot: bool) {
        self.hot.store(hot, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.free.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_free(&self, free: bool) {
        self.free.store(free, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_migrating(&self) -> bool {
        self.migrating.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_migrating(&self, migrating: bool) {
        self.migrating.store(migrating, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_migrated(&self, migrated: bool) {
        self.migrated.store(migrated, Ordering::Relaxed);
    }

    #[inline]
    pub fn was_migrated(&self) -> bool {
        self.migrated.load(Ordering::Relaxed)
    }

    /// Cohort this page is linked into, or `Cohort::None`. Written only under
    /// the owning list's lock; lock-free reads are tolerated (membership may
    /// be stale by the time the caller acts and must be re-validated under a
    /// lock).
    #[inline]
    pub fn cohort(&self) -> Cohort {
        Cohort::from_u8(self.cohort.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_cohort(&self, cohort: Cohort) {
        self.cohort.store(cohort as u8, Ordering::Release);
    }

    /// Lock the compound state.
    #[inline]
    pub fn meta(&self) -> MutexGuard<'_, PageMeta> {
        self.meta.lock()
    }

    /// Try-lock the compound state; the ingestor must not stall behind the
    /// migrator.
    #[inline]
    pub fn try_meta(&self) -> Option<MutexGuard<'_, PageMeta>> {
        self.meta.try_lock()
    }

    /// Reinitialize a recycled descriptor in place for a new range.
    /// Caller must have detached the page from every cohort first.
    pub fn reinit(&self, va: u64, va_start: u64, size: u64, tier: Tier) {
        debug_assert_eq!(self.cohort(), Cohort::None);
        let mut meta = self.meta();
        meta.va = va;
        meta.va_start = va_start;
        meta.size = size;
        meta.accesses = 0;
        meta.local_clock = 0;
        meta.cyc_accessed = 0;
        meta.ip = 0;
        meta.neighbors = [NeighborSlot::default(); MAX_NEIGHBORS];
        drop(meta);

        self.set_tier(tier);
        self.set_hot(false);
        self.set_free(false);
        self.set_migrating(false);
        self.set_migrated(false);
    }
}
