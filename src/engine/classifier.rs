// Hotness classification.
//
// Per-page access counters cool by right-shift whenever the global epoch
// advances; the epoch itself is budgeted in cycles. Classification uses
// try-lock throughout: the ingestor must never stall behind the migrator.

use crate::mem::{Cohort, FifoList, PageArena, PageIdx, Tier};
use crate::telemetry::StatCounters;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cycle-budgeted global cooling epoch.
pub struct CoolingClock {
    global: AtomicU64,
    last_cool: AtomicU64,
    threshold: u64,
}

impl CoolingClock {
    pub fn new(threshold: u64) -> Self {
        Self {
            global: AtomicU64::new(0),
            last_cool: AtomicU64::new(0),
            threshold,
        }
    }

    #[inline]
    pub fn global(&self) -> u64 {
        self.global.load(Ordering::Relaxed)
    }

    /// Advance the epoch when the cycle counter has moved past the budget.
    /// Returns true on an advance. Called from the ingest loop only.
    pub fn maybe_advance(&self, now_cyc: u64) -> bool {
        let last = self.last_cool.load(Ordering::Relaxed);
        if now_cyc.saturating_sub(last) < self.threshold {
            return false;
        }
        if self
            .last_cool
            .compare_exchange(last, now_cyc, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.global.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }
}

/// Outcome of recording one sample against a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Counter crossed the hot threshold; a hot request was posted.
    Hot,
    /// Below threshold; a cold request was posted.
    Cold,
    /// Page lock was contended; no side effect.
    Contended,
    /// Page is free; sample discarded.
    Freed,
}

pub struct Classifier {
    hot_threshold: u64,
    clock: CoolingClock,
}

impl Classifier {
    pub fn new(hot_threshold: u64, cool_cycles: u64) -> Self {
        Self {
            hot_threshold,
            clock: CoolingClock::new(cool_cycles),
        }
    }

    #[inline]
    pub fn clock(&self) -> &CoolingClock {
        &self.clock
    }

    /// Record one hardware sample: cool, count, and re-classify.
    ///
    /// `promote_enabled` is lowered by the ingestor under throttle
    /// backpressure; counters still update but no hot request is posted.
    pub fn record_access(
        &self,
        arena: &PageArena,
        hot: &FifoList,
        cold: &FifoList,
        idx: PageIdx,
        cyc: u64,
        ip: u64,
        promote_enabled: bool,
        stats: &StatCounters,
    ) -> AccessOutcome {
        let page = arena.slot(idx);
        let Some(mut meta) = page.try_meta() else {
            stats.contended_pages.fetch_add(1, Ordering::Relaxed);
            return AccessOutcome::Contended;
        };
        if page.is_free() {
            return AccessOutcome::Freed;
        }

        // Cooling law: accesses >>= (global - local) before the increment.
        let global = self.clock.global();
        let shift = global.saturating_sub(meta.local_clock);
        if shift > 0 {
            meta.accesses >>= shift.min(63);
            meta.local_clock = global;
        }

        meta.accesses += 1;
        meta.cyc_accessed = cyc;
        meta.ip = ip;

        let crossed = meta.accesses >= self.hot_threshold;
        // Keep the page lock across the cohort move; release racing with the
        // gateway is excluded for the whole transition.
        let _meta = meta;
        if crossed {
            if promote_enabled {
                self.make_hot_locked(arena, hot, cold, idx);
            }
            AccessOutcome::Hot
        } else {
            self.make_cold_locked(arena, hot, cold, idx);
            AccessOutcome::Cold
        }
    }

    /// Post a hot request for a page (used for predicted prefetch-promotes
    /// as well as threshold crossings). Try-lock; a contended page is left
    /// for its next sample.
    pub fn make_hot(&self, arena: &PageArena, hot: &FifoList, cold: &FifoList, idx: PageIdx) {
        let page = arena.slot(idx);
        let Some(_meta) = page.try_meta() else {
            return;
        };
        self.make_hot_locked(arena, hot, cold, idx);
    }

    pub fn make_cold(&self, arena: &PageArena, hot: &FifoList, cold: &FifoList, idx: PageIdx) {
        let page = arena.slot(idx);
        let Some(_meta) = page.try_meta() else {
            return;
        };
        self.make_cold_locked(arena, hot, cold, idx);
    }

    /// Hot transition with the page lock already held by the caller.
    /// Only an IN_REM page joins the hot cohort; a hot request for a page
    /// already in DRAM is a flag update and nothing else.
    fn make_hot_locked(&self, arena: &PageArena, hot: &FifoList, cold: &FifoList, idx: PageIdx) {
        let page = arena.slot(idx);
        if page.is_free() {
            return;
        }
        page.set_hot(true);

        if page.cohort() != Cohort::Hot && page.tier() == Tier::Rem {
            cold.remove(arena, idx);
            hot.enqueue(arena, idx);
        }
    }

    fn make_cold_locked(&self, arena: &PageArena, hot: &FifoList, cold: &FifoList, idx: PageIdx) {
        let page = arena.slot(idx);
        if page.is_free() {
            return;
        }
        page.set_hot(false);

        if page.cohort() != Cohort::Cold && page.tier() == Tier::Dram {
            hot.remove(arena, idx);
            cold.enqueue(arena, idx);
        }
    }
}
