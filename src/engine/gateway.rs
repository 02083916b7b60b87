// Allocation gateway.
//
// Implements the allocate/release contract the interposer exposes to the
// application: pick a tier split under the DRAM budget, forward the actual
// mapping to the kernel, bind each portion, and materialize page
// descriptors over the range (recycling from the free cohort first).

use crate::config::BASE_PAGE_SIZE;
use crate::engine::manager::TmemManager;
use crate::error::Result;
use crate::mem::{Cohort, PageIdx, Tier};
use crate::sys::mm;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// Tier split for one allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub dram_bytes: u64,
    pub rem_bytes: u64,
}

/// Placement policy: whole request on DRAM when it fits; whole request on
/// REM when less than one tier page is free; otherwise the free bytes are
/// rounded down to a page multiple for DRAM and the remainder goes remote.
pub fn plan_split(bytes_free: i64, length: u64, page_size: u64) -> SplitPlan {
    if bytes_free >= length as i64 {
        return SplitPlan {
            dram_bytes: length,
            rem_bytes: 0,
        };
    }
    if bytes_free < page_size as i64 {
        return SplitPlan {
            dram_bytes: 0,
            rem_bytes: length,
        };
    }
    let dram = (bytes_free as u64 / page_size) * page_size;
    SplitPlan {
        dram_bytes: dram,
        rem_bytes: length - dram,
    }
}

#[inline]
fn round_up_base(length: usize) -> u64 {
    let base = BASE_PAGE_SIZE as usize;
    ((length + base - 1) / base * base) as u64
}

/// Handle a managed anonymous mapping request.
pub fn allocate(
    mgr: &TmemManager,
    length: usize,
    prot: c_int,
    flags: c_int,
) -> Result<*mut c_void> {
    let length = round_up_base(length);

    // Placement decisions wait out the migrator's commit fence.
    mgr.budget.wait_fence();
    let plan = plan_split(mgr.budget.bytes_free(), length, mgr.cfg.page_size);

    // SAFETY: kernel-chosen address, anonymous mapping forwarded unchanged.
    let base = unsafe {
        mm::raw_mmap(
            std::ptr::null_mut(),
            length as usize,
            prot,
            flags,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(crate::error::TmemError::Map(format!(
            "mmap({length} bytes): {}",
            std::io::Error::last_os_error()
        )));
    }
    let base_va = base as u64;

    // Bind each portion. A failed bind is logged and the intended placement
    // kept; the sampler will re-observe the page and migration re-decides.
    if plan.dram_bytes > 0 {
        if let Err(e) = mgr.binder.bind(base_va, plan.dram_bytes, Tier::Dram.node()) {
            mgr.stats.bind_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, bytes = plan.dram_bytes, "allocation bind to DRAM failed");
        }
    }
    if plan.rem_bytes > 0 {
        if let Err(e) = mgr.binder.bind(
            base_va + plan.dram_bytes,
            plan.rem_bytes,
            Tier::Rem.node(),
        ) {
            mgr.stats.bind_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, bytes = plan.rem_bytes, "allocation bind to REM failed");
        }
    }

    mgr.budget.add_used(plan.dram_bytes as i64);
    materialize(mgr, base_va, length, plan.dram_bytes);

    mgr.stats.allocations.fetch_add(1, Ordering::Relaxed);
    debug!(
        base = format_args!("0x{base_va:x}"),
        length,
        dram = plan.dram_bytes,
        rem = plan.rem_bytes,
        "allocation placed"
    );
    Ok(base)
}

/// Cover `[base_va, base_va + length)` with descriptors in tier-page
/// strides. The trailing descriptor may be short, never below the base page
/// size. Descriptors are recycled from the free cohort when possible.
fn materialize(mgr: &TmemManager, base_va: u64, length: u64, dram_bytes: u64) {
    let page_size = mgr.cfg.page_size;
    let page_mask = mgr.cfg.page_mask();
    let end = base_va + length;

    let mut cur = base_va;
    while cur < end {
        let key = cur & page_mask;
        let next = (key + page_size).min(end);
        let size = next - cur;
        let tier = if cur - base_va < dram_bytes {
            Tier::Dram
        } else {
            Tier::Rem
        };

        let idx = match mgr.free.dequeue(&mgr.arena) {
            Some(idx) => {
                mgr.stats.recycled_descriptors.fetch_add(1, Ordering::Relaxed);
                idx
            }
            None => mgr.arena.alloc(),
        };
        mgr.arena.slot(idx).reinit(key, cur, size, tier);

        if !mgr.table.add(key, idx) {
            // Another sub-page allocation already owns this key; hand the
            // descriptor straight back for recycling.
            let page = mgr.arena.slot(idx);
            page.set_free(true);
            mgr.free.enqueue(&mgr.arena, idx);
        }

        cur = next;
    }
}

/// Handle a managed unmap request: forward to the kernel, then retire every
/// descriptor the range covers. Descriptor storage is retained for recycle.
pub fn release(mgr: &TmemManager, addr: *mut c_void, length: usize) -> Result<c_int> {
    let length = round_up_base(length);
    let base_va = addr as u64;

    // SAFETY: forwarding the caller's own range unchanged.
    let rc = unsafe { mm::raw_munmap(addr, length as usize) };
    if rc != 0 {
        return Ok(rc);
    }

    let page_mask = mgr.cfg.page_mask();
    let end = base_va + length;
    let mut key = base_va & page_mask;

    while key < end {
        if let Some(idx) = mgr.table.remove(key) {
            retire(mgr, idx);
        }
        key += mgr.cfg.page_size;
    }

    mgr.stats.releases.fetch_add(1, Ordering::Relaxed);
    Ok(0)
}

/// Flag a descriptor free, settle its DRAM accounting, and park it in the
/// free cohort.
fn retire(mgr: &TmemManager, idx: PageIdx) {
    let page = mgr.arena.slot(idx);
    let meta = page.meta();

    if page.is_free() {
        return;
    }
    if page.tier() == Tier::Dram {
        mgr.budget.add_used(-(meta.size as i64));
    }

    page.set_free(true);
    page.set_hot(false);
    drop(meta);

    // Detach from whichever cohort still claims the page before it joins
    // the free list (I4: at most one home).
    match page.cohort() {
        Cohort::Hot => {
            mgr.hot.remove(&mgr.arena, idx);
        }
        Cohort::Cold => {
            mgr.cold.remove(&mgr.arena, idx);
        }
        _ => {}
    }
    mgr.free.enqueue(&mgr.arena, idx);
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;
    const GIB: i64 = 1024 * 1024 * 1024;
    const PAGE: u64 = 2 * MIB;

    #[test]
    fn whole_request_fits_dram() {
        // Seed scenario 1: 2 GiB budget, 1 GiB then 512 MiB both fit.
        let plan = plan_split(2 * GIB, GIB as u64, PAGE);
        assert_eq!(plan, SplitPlan { dram_bytes: GIB as u64, rem_bytes: 0 });

        let plan = plan_split(GIB, 512 * MIB, PAGE);
        assert_eq!(plan, SplitPlan { dram_bytes: 512 * MIB, rem_bytes: 0 });
    }

    #[test]
    fn split_rounds_dram_portion_down() {
        // Seed scenario 2: 512 MiB free, 1 GiB request.
        let plan = plan_split(512 * MIB as i64, GIB as u64, PAGE);
        assert_eq!(plan.dram_bytes, 512 * MIB);
        assert_eq!(plan.rem_bytes, 512 * MIB);
        assert_eq!(plan.dram_bytes % PAGE, 0);

        // An unaligned free amount rounds down to a page multiple.
        let plan = plan_split((3 * MIB) as i64, GIB as u64, PAGE);
        assert_eq!(plan.dram_bytes, 2 * MIB);
        assert_eq!(plan.rem_bytes, GIB as u64 - 2 * MIB);
    }

    #[test]
    fn sub_page_free_goes_whole_to_rem() {
        // Seed scenario 3: 1 KiB free, 2 MiB request.
        let plan = plan_split(1024, 2 * MIB, PAGE);
        assert_eq!(plan, SplitPlan { dram_bytes: 0, rem_bytes: 2 * MIB });

        // Negative free space behaves the same.
        let plan = plan_split(-4096, 2 * MIB, PAGE);
        assert_eq!(plan.dram_bytes, 0);
    }

    #[test]
    fn length_rounds_to_base_pages() {
        assert_eq!(round_up_base(1), BASE_PAGE_SIZE);
        assert_eq!(round_up_base(4096), 4096);
        assert_eq!(round_up_base(4097), 8192);
    }
}
