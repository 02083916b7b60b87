// Central event counters.
//
// Everything recoverable in the manager surfaces here: counters are bumped
// locally with relaxed atomics and read once a second by the stats emitter.
// The access counters are windowed (reset at each emit); the rest are
// cumulative.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StatCounters {
    // Sampling.
    pub throttles: AtomicU64,
    pub unthrottles: AtomicU64,
    pub unknown_samples: AtomicU64,
    pub lost_records: AtomicU64,
    pub wrapped_dram: AtomicU64,
    pub wrapped_rem: AtomicU64,
    pub local_accesses: AtomicU64,
    pub remote_accesses: AtomicU64,
    pub unresolved_samples: AtomicU64,
    pub contended_pages: AtomicU64,
    pub sampler_restarts: AtomicU64,
    pub internal_mem_overhead: AtomicU64,

    // Migration.
    pub promotions: AtomicU64,
    pub demotions: AtomicU64,
    pub cold_exhaustion_aborts: AtomicU64,
    pub bind_failures: AtomicU64,
    pub skipped_candidates: AtomicU64,

    // Predictor.
    pub predicted_promotes: AtomicU64,

    // Gateway.
    pub allocations: AtomicU64,
    pub releases: AtomicU64,
    pub recycled_descriptors: AtomicU64,
}

/// Point-in-time copy of the counters, serializable for the stats log.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub throttles: u64,
    pub unthrottles: u64,
    pub unknown_samples: u64,
    pub lost_records: u64,
    pub wrapped_dram: u64,
    pub wrapped_rem: u64,
    pub local_accesses: u64,
    pub remote_accesses: u64,
    pub unresolved_samples: u64,
    pub contended_pages: u64,
    pub sampler_restarts: u64,
    pub internal_mem_overhead: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub cold_exhaustion_aborts: u64,
    pub bind_failures: u64,
    pub skipped_candidates: u64,
    pub predicted_promotes: u64,
    pub allocations: u64,
    pub releases: u64,
    pub recycled_descriptors: u64,
    pub dram_used: i64,
    pub dram_size: i64,
    pub hot_len: usize,
    pub cold_len: usize,
    pub free_len: usize,
}

impl StatCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Promotion decisions are suspended while more throttle than unthrottle
    /// events were seen in the current window.
    #[inline]
    pub fn backpressured(&self) -> bool {
        self.throttles.load(Ordering::Relaxed) > self.unthrottles.load(Ordering::Relaxed)
    }

    /// Copy the counters out; windowed access counters are reset when
    /// `reset_window` is set.
    pub fn snapshot(
        &self,
        reset_window: bool,
        dram_used: i64,
        dram_size: i64,
        hot_len: usize,
        cold_len: usize,
        free_len: usize,
    ) -> StatsSnapshot {
        let window = |c: &AtomicU64| {
            if reset_window {
                c.swap(0, Ordering::Relaxed)
            } else {
                c.load(Ordering::Relaxed)
            }
        };
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        StatsSnapshot {
            throttles: load(&self.throttles),
            unthrottles: load(&self.unthrottles),
            unknown_samples: load(&self.unknown_samples),
            lost_records: load(&self.lost_records),
            wrapped_dram: load(&self.wrapped_dram),
            wrapped_rem: load(&self.wrapped_rem),
            local_accesses: window(&self.local_accesses),
            remote_accesses: window(&self.remote_accesses),
            unresolved_samples: load(&self.unresolved_samples),
            contended_pages: load(&self.contended_pages),
            sampler_restarts: load(&self.sampler_restarts),
            internal_mem_overhead: load(&self.internal_mem_overhead),
            promotions: load(&self.promotions),
            demotions: load(&self.demotions),
            cold_exhaustion_aborts: load(&self.cold_exhaustion_aborts),
            bind_failures: load(&self.bind_failures),
            skipped_candidates: load(&self.skipped_candidates),
            predicted_promotes: load(&self.predicted_promotes),
            allocations: load(&self.allocations),
            releases: load(&self.releases),
            recycled_descriptors: load(&self.recycled_descriptors),
            dram_used,
            dram_size,
            hot_len,
            cold_len,
            free_len,
        }
    }
}
