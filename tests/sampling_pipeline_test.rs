// Sampling pipeline tests: synthetic perf rings through the ring consumer,
// classification, and prediction, with no perf hardware involved.

use parking_lot::Mutex;
use std::sync::Arc;
use tiermem::engine::classifier::AccessOutcome;
use tiermem::mem::Tier;
use tiermem::sampling::{RingRecord, RingView};
use tiermem::sys::numa::MemoryBinder;
use tiermem::sys::perf::{PerfEventHeader, PerfEventMmapPage, PERF_RECORD_SAMPLE};
use tiermem::{Config, TmemManager};

const PAGE: u64 = 2 * 1024 * 1024;
const DATA_SIZE: usize = 4096;

#[derive(Debug, Default)]
struct NullBinder;

impl MemoryBinder for NullBinder {
    fn bind(&self, _addr: u64, _len: u64, _node: u32) -> tiermem::Result<()> {
        Ok(())
    }
}

#[repr(C)]
struct FakeRing {
    header: PerfEventMmapPage,
    _pad: [u8; 4096 - std::mem::size_of::<PerfEventMmapPage>()],
    data: [u8; DATA_SIZE],
}

fn fake_ring() -> Box<FakeRing> {
    // SAFETY: plain-old-data struct; all-zero is a valid state.
    let mut ring: Box<FakeRing> = unsafe { Box::new_zeroed().assume_init() };
    ring.header.data_offset = 4096;
    ring.header.data_size = DATA_SIZE as u64;
    ring
}

fn push_sample(ring: &mut FakeRing, ip: u64, addr: u64) {
    let hdr = PerfEventHeader {
        type_: PERF_RECORD_SAMPLE,
        misc: 0,
        size: 24,
    };
    let off = (ring.header.data_head % DATA_SIZE as u64) as usize;
    let hdr_bytes: [u8; 8] = unsafe { std::mem::transmute(hdr) };
    ring.data[off..off + 8].copy_from_slice(&hdr_bytes);
    ring.data[off + 8..off + 16].copy_from_slice(&ip.to_le_bytes());
    ring.data[off + 16..off + 24].copy_from_slice(&addr.to_le_bytes());
    ring.header.data_head += 24;
}

fn manager() -> Arc<TmemManager> {
    let cfg = Config {
        dram_size: Some((64 * PAGE) as i64),
        log_dir: std::env::temp_dir(),
        ..Config::default()
    };
    Arc::new(TmemManager::new(cfg, Arc::new(NullBinder)).unwrap())
}

/// Drive sampled addresses through ring parsing and classification the way
/// the ingest loop does.
fn feed(mgr: &TmemManager, ring: &mut FakeRing, cyc: &mut u64) -> Vec<AccessOutcome> {
    let mut view = unsafe { RingView::new(&mut ring.header as *mut _) };
    let mut outcomes = Vec::new();
    while let Some(record) = view.next_record() {
        let RingRecord::Sample { ip, addr } = record else {
            continue;
        };
        let Some(idx) = mgr.table.find(addr) else {
            continue;
        };
        *cyc += 1;
        outcomes.push(mgr.classifier.record_access(
            &mgr.arena,
            &mgr.hot,
            &mgr.cold,
            idx,
            *cyc,
            ip,
            true,
            &mgr.stats,
        ));
        mgr.predictor.lock().observe(&mgr.arena, idx);
    }
    outcomes
}

fn tracked_page(mgr: &TmemManager, va: u64, tier: Tier) {
    let idx = mgr.arena.alloc();
    mgr.arena.slot(idx).reinit(va, va, PAGE, tier);
    mgr.table.add(va, idx);
}

#[test]
fn sampled_rem_page_crosses_the_hot_threshold() {
    let mgr = manager();
    let mut ring = fake_ring();
    let mut cyc = 0u64;

    let va = 0x7f00_0000_0000u64;
    tracked_page(&mgr, va, Tier::Rem);

    // Seven samples inside the page: still cold.
    for i in 0..7 {
        push_sample(&mut ring, 0x40_1000, va + i * 64);
    }
    let outcomes = feed(&mgr, &mut ring, &mut cyc);
    assert_eq!(outcomes.len(), 7);
    assert!(outcomes.iter().all(|o| *o == AccessOutcome::Cold));
    assert!(mgr.hot.is_empty());

    // The eighth crosses the threshold and posts the hot request.
    push_sample(&mut ring, 0x40_1000, va + 8 * 64);
    let outcomes = feed(&mgr, &mut ring, &mut cyc);
    assert_eq!(outcomes, vec![AccessOutcome::Hot]);
    assert_eq!(mgr.hot.len(), 1);
}

#[test]
fn samples_resolve_across_page_granularities() {
    let mgr = manager();
    let mut ring = fake_ring();
    let mut cyc = 0u64;

    // A short trailing descriptor keyed at base-page granularity.
    let tail_va = 0x7f00_0020_0000u64 + 4 * 4096;
    let idx = mgr.arena.alloc();
    mgr.arena.slot(idx).reinit(tail_va, tail_va, 4096, Tier::Rem);
    mgr.table.add(tail_va, idx);

    push_sample(&mut ring, 0x40_2000, tail_va + 100);
    let outcomes = feed(&mgr, &mut ring, &mut cyc);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(mgr.arena.slot(idx).meta().accesses, 1);
    assert_eq!(mgr.arena.slot(idx).meta().ip, 0x40_2000);
}

#[test]
fn untracked_samples_fall_through() {
    let mgr = manager();
    let mut ring = fake_ring();
    let mut cyc = 0u64;

    push_sample(&mut ring, 0x40_1000, 0xdead_0000);
    let outcomes = feed(&mgr, &mut ring, &mut cyc);
    assert!(outcomes.is_empty());
    assert!(mgr.hot.is_empty());
    assert!(mgr.cold.is_empty());
}

#[test]
fn repeated_sequences_become_predictions() {
    let mgr = manager();
    let mut ring = fake_ring();
    let mut cyc = 0u64;

    // A pool of pages sampled in a recurring order; the history window
    // evicts and refines as the sequence repeats.
    let base = 0x7f40_0000_0000u64;
    for i in 0..24u64 {
        tracked_page(&mgr, base + i * PAGE, Tier::Rem);
    }
    for round in 0..6u64 {
        for i in 0..24u64 {
            push_sample(&mut ring, 0x40_1000 + i, base + i * PAGE + round);
            // Small ring: drain as we go.
            feed(&mgr, &mut ring, &mut cyc);
        }
    }

    // Neighbor sets formed over the recurring sequence.
    let refined = (0..24u64)
        .filter(|i| {
            let idx = mgr.table.find(base + i * PAGE).unwrap();
            let meta = mgr.arena.slot(idx).meta();
            meta.neighbors.iter().any(|n| n.page.is_some())
        })
        .count();
    assert!(refined > 0, "no neighbor sets were refined");
}
