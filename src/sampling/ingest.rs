// The sample ingest loop.
//
// Round-robin over every (CPU, event) ring: parse records, resolve sampled
// addresses against the page table, update hotness, and feed the
// predictor. The loop never blocks; lossy rings and try-locked pages are
// dropped and counted.

use crate::engine::classifier::AccessOutcome;
use crate::engine::manager::TmemManager;
use crate::sampling::ring::{RingRecord, RingView};
use crate::sampling::sampler::SamplerEntry;
use crate::sampling::trace::TraceRecord;
use crate::sampling::EventKind;
use crate::sys::time::rdtscp;
use std::sync::atomic::Ordering;
use tracing::warn;

/// Iterations between kill-flag checks.
const KILL_CHECK_MASK: u64 = 0xF;

pub fn ingest_loop(mgr: &TmemManager) {
    let Some(samplers) = mgr.samplers() else {
        warn!("ingest loop started without samplers");
        return;
    };

    let mut loops: u64 = 0;
    let mut predictions = Vec::new();
    loop {
        loops += 1;
        if loops & KILL_CHECK_MASK == 0 && mgr.killed() {
            break;
        }

        for entry in samplers.entries() {
            drain_ring(mgr, entry, &mut predictions);
        }

        // Advance the cooling epoch once the cycle budget has elapsed.
        mgr.classifier.clock().maybe_advance(rdtscp());
    }
}

/// Drain one ring to empty (or to its wrap-drop point).
fn drain_ring(mgr: &TmemManager, entry: &SamplerEntry, predictions: &mut Vec<crate::mem::PageIdx>) {
    // SAFETY: the ingest thread is the sole ring consumer and the mapping
    // outlives the manager.
    let mut ring = unsafe { RingView::new(entry.sampler.mmap_page()) };

    let mut produced = false;
    while let Some(record) = ring.next_record() {
        produced = true;
        match record {
            RingRecord::Sample { ip, addr } => {
                handle_sample(mgr, entry.cpu_idx, entry.kind, ip, addr, predictions)
            }
            RingRecord::Throttle => {
                mgr.stats.throttles.fetch_add(1, Ordering::Relaxed);
            }
            RingRecord::Unthrottle => {
                mgr.stats.unthrottles.fetch_add(1, Ordering::Relaxed);
            }
            RingRecord::Lost => {
                mgr.stats.lost_records.fetch_add(1, Ordering::Relaxed);
            }
            RingRecord::Unknown(_) => {
                mgr.stats.unknown_samples.fetch_add(1, Ordering::Relaxed);
            }
            RingRecord::WrapDrop => {
                let counter = match entry.kind {
                    EventKind::DramRead => &mgr.stats.wrapped_dram,
                    EventKind::RemoteRead => &mgr.stats.wrapped_rem,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if produced {
        entry.idle.note_productive();
    } else if entry.idle.note_idle() {
        // The kernel side stalled; cycle the sampler to recover.
        match entry.sampler.cycle() {
            Ok(()) => {
                mgr.stats.sampler_restarts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(cpu = entry.cpu_idx, error = %e, "sampler cycle failed"),
        }
    }
}

fn handle_sample(
    mgr: &TmemManager,
    cpu: u32,
    kind: EventKind,
    ip: u64,
    addr: u64,
    predictions: &mut Vec<crate::mem::PageIdx>,
) {
    if addr == 0 {
        return;
    }

    let cyc = rdtscp();
    let rec = TraceRecord {
        cyc,
        va: addr,
        ip,
        cpu,
        evt: kind as u8,
    };
    if let Some(traces) = mgr.traces() {
        traces.raw.append(&rec);
    }

    match kind {
        EventKind::DramRead => mgr.stats.local_accesses.fetch_add(1, Ordering::Relaxed),
        EventKind::RemoteRead => mgr.stats.remote_accesses.fetch_add(1, Ordering::Relaxed),
    };

    // Resolve against the 2 MiB key, falling back to 4 KiB (the table does
    // both); untracked memory is counted and dropped.
    let Some(idx) = mgr.table.find(addr) else {
        mgr.stats.unresolved_samples.fetch_add(1, Ordering::Relaxed);
        return;
    };
    if let Some(traces) = mgr.traces() {
        traces.tracked.append(&rec);
    }

    let backpressured = mgr.stats.backpressured();
    let outcome = mgr.classifier.record_access(
        &mgr.arena,
        &mgr.hot,
        &mgr.cold,
        idx,
        cyc,
        ip,
        !backpressured,
        &mgr.stats,
    );

    let mut predictor = mgr.predictor.lock();
    predictor.observe(&mgr.arena, idx);

    if outcome == AccessOutcome::Hot {
        predictions.clear();
        predictor.predict(
            &mgr.arena,
            idx,
            mgr.hot.len(),
            &mgr.timing,
            backpressured,
            predictions,
        );
        drop(predictor);

        for &pred in predictions.iter() {
            mgr.classifier.make_hot(&mgr.arena, &mgr.hot, &mgr.cold, pred);
            mgr.stats.predicted_promotes.fetch_add(1, Ordering::Relaxed);
        }
    }
}
