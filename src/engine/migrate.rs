// Migration worker.
//
// Consumes the hot cohort and rebalances against the cold cohort under the
// DRAM-bytes invariant: a promotion only commits once enough cold bytes
// were demoted to make room. The allocator fence is held for the whole
// swap and is guaranteed down on every exit path (RAII guard), the
// cold-exhaustion abort included.

use crate::engine::manager::TmemManager;
use crate::mem::{PageIdx, Tier};
use crate::sys::time::rdtscp;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// EMA window shift: alpha = 1/8.
const EMA_SHIFT: u32 = 3;

/// Running migration-latency estimates, in cycles. Written by the migrator,
/// read by the predictor when gating prefetch-promotes.
#[derive(Debug, Default)]
pub struct MigrationTiming {
    move_cyc: AtomicU64,
    queue_cyc: AtomicU64,
}

impl MigrationTiming {
    pub fn new() -> Self {
        Self::default()
    }

    fn ema(current: &AtomicU64, sample: u64) {
        let old = current.load(Ordering::Relaxed);
        let new = if old == 0 {
            sample
        } else {
            old - (old >> EMA_SHIFT) + (sample >> EMA_SHIFT)
        };
        current.store(new, Ordering::Relaxed);
    }

    pub fn record_move(&self, cycles: u64) {
        Self::ema(&self.move_cyc, cycles);
    }

    pub fn record_queue(&self, cycles: u64) {
        Self::ema(&self.queue_cyc, cycles);
    }

    /// Cycles one rebind is expected to take.
    pub fn move_estimate(&self) -> u64 {
        self.move_cyc.load(Ordering::Relaxed)
    }

    /// Cycles a hot candidate is expected to wait in the queue; reads as 0
    /// while the hot cohort is empty.
    pub fn queue_estimate(&self, hot_len: usize) -> u64 {
        if hot_len == 0 {
            0
        } else {
            self.queue_cyc.load(Ordering::Relaxed)
        }
    }
}

/// What one service pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// Hot cohort was empty.
    Idle,
    /// Candidate failed validation and was dropped.
    Skipped,
    /// Tier swap committed.
    Promoted(PageIdx),
    /// Not enough cold bytes; migration rolled back.
    Aborted,
    /// Rebind failed; placement unchanged.
    BindFailed,
}

/// Service one hot candidate end to end.
pub fn migrate_once(mgr: &TmemManager) -> MigrateOutcome {
    let Some(idx) = mgr.hot.dequeue(&mgr.arena) else {
        return MigrateOutcome::Idle;
    };

    let page = mgr.arena.slot(idx);
    let meta = page.meta();

    // Revalidate after the queue wait: the page may have been promoted,
    // cooled, or released since it was posted. Dropped candidates re-enter
    // through their next sample.
    if page.tier() == Tier::Dram || !page.is_hot() || page.is_free() {
        mgr.stats.skipped_candidates.fetch_add(1, Ordering::Relaxed);
        return MigrateOutcome::Skipped;
    }

    let now = rdtscp();
    mgr.timing.record_queue(now.saturating_sub(meta.cyc_accessed));

    let size = meta.size as i64;
    let (va_start, len) = (meta.va_start, meta.size);

    page.set_migrating(true);
    let _fence = mgr.budget.fence();
    let bytes_free = mgr.budget.bytes_free();

    let outcome = if bytes_free >= size {
        promote(mgr, idx, va_start, len, 0)
    } else {
        match demote_until(mgr, size - bytes_free) {
            Ok(cold_bytes) => promote(mgr, idx, va_start, len, cold_bytes),
            Err(cold_bytes) => {
                // Cold cohort exhausted. The demotions that did happen have
                // left DRAM; account for them, then give up on this
                // candidate. The fence guard drops on return.
                mgr.stats
                    .cold_exhaustion_aborts
                    .fetch_add(1, Ordering::Relaxed);
                mgr.budget.add_used(-cold_bytes);
                warn!(
                    page = idx.0,
                    need = size,
                    freed = cold_bytes,
                    "cold cohort exhausted, migration aborted"
                );
                MigrateOutcome::Aborted
            }
        }
    };

    page.set_migrating(false);
    outcome
}

/// Rebind the candidate into DRAM and commit accounting. `cold_bytes` is
/// what the demotion pass already freed; the final commit nets it against
/// the candidate's size so the fence drops with I1 intact.
fn promote(mgr: &TmemManager, idx: PageIdx, va_start: u64, len: u64, cold_bytes: i64) -> MigrateOutcome {
    let page = mgr.arena.slot(idx);
    let start = rdtscp();

    match mgr.binder.bind(va_start, len, Tier::Dram.node()) {
        Ok(()) => {
            mgr.timing.record_move(rdtscp().saturating_sub(start));
            page.set_tier(Tier::Dram);
            page.set_hot(true);
            page.set_migrated(true);
            mgr.budget.commit_used(len as i64 - cold_bytes);
            mgr.stats.promotions.fetch_add(1, Ordering::Relaxed);
            debug!(page = idx.0, bytes = len, "promoted to DRAM");
            MigrateOutcome::Promoted(idx)
        }
        Err(e) => {
            // Tier stays IN_REM so I2 holds; the next sample re-decides.
            mgr.stats.bind_failures.fetch_add(1, Ordering::Relaxed);
            if cold_bytes != 0 {
                mgr.budget.add_used(-cold_bytes);
            }
            warn!(page = idx.0, error = %e, "promotion rebind failed");
            MigrateOutcome::BindFailed
        }
    }
}

/// Demote cold pages until at least `needed` bytes are freed. Returns the
/// bytes actually demoted, as `Err` when the cold cohort ran dry first.
fn demote_until(mgr: &TmemManager, needed: i64) -> std::result::Result<i64, i64> {
    let mut cold_bytes: i64 = 0;

    while cold_bytes < needed {
        let Some(cidx) = mgr.cold.dequeue(&mgr.arena) else {
            return Err(cold_bytes);
        };

        let cold_page = mgr.arena.slot(cidx);
        let cmeta = cold_page.meta();

        // A page that heated up or was released while queued is not a
        // demotion victim.
        if cold_page.tier() != Tier::Dram || cold_page.is_hot() || cold_page.is_free() {
            continue;
        }

        match mgr.binder.bind(cmeta.va_start, cmeta.size, Tier::Rem.node()) {
            Ok(()) => {
                cold_page.set_tier(Tier::Rem);
                cold_bytes += cmeta.size as i64;
                mgr.stats.demotions.fetch_add(1, Ordering::Relaxed);
                debug!(page = cidx.0, bytes = cmeta.size, "demoted to REM");
            }
            Err(e) => {
                mgr.stats.bind_failures.fetch_add(1, Ordering::Relaxed);
                warn!(page = cidx.0, error = %e, "demotion rebind failed");
            }
        }
    }

    Ok(cold_bytes)
}
