// Lifecycle controller.
//
// One manager value owns the whole engine: arena, page table, cohorts,
// budget, classifier, predictor, samplers, and telemetry. Lifecycle is
// init -> start (spawn stats, then ingestor, then migrator) -> cooperative
// shutdown; workers poll the kill flag at the top of their loops and
// outstanding migrations complete.

use crate::config::Config;
use crate::engine::classifier::Classifier;
use crate::engine::migrate::{self, MigrateOutcome, MigrationTiming};
use crate::engine::gateway;
use crate::error::{Result, TmemError};
use crate::mem::{Cohort, DramBudget, FifoList, PageArena, PageTable};
use crate::predictor::Predictor;
use crate::sampling::{ingest, SamplerSet, TraceFiles};
use crate::sys::numa::{self, MemoryBinder, SysBinder};
use crate::sys::time::{elapsed_secs, monotonic_ns};
use crate::telemetry::{self, StatsLog, StatCounters};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct TmemManager {
    pub cfg: Config,
    pub arena: PageArena,
    pub table: PageTable,
    pub hot: FifoList,
    pub cold: FifoList,
    pub free: FifoList,
    pub budget: DramBudget,
    pub classifier: Classifier,
    pub timing: MigrationTiming,
    pub predictor: Mutex<Predictor>,
    pub stats: StatCounters,
    pub binder: Arc<dyn MemoryBinder>,

    traces: OnceCell<TraceFiles>,
    samplers: OnceCell<SamplerSet>,
    stats_log: OnceCell<StatsLog>,
    killed: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    start_ns: u64,
}

impl std::fmt::Debug for TmemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmemManager").finish_non_exhaustive()
    }
}

impl TmemManager {
    /// Build the in-memory engine. No files, samplers, or threads yet; that
    /// is `start`. Fatal on configuration errors, including an unresolvable
    /// DRAM budget.
    pub fn new(cfg: Config, binder: Arc<dyn MemoryBinder>) -> Result<Self> {
        cfg.validate()?;

        let dram_size = match (cfg.dram_size, cfg.dram_buffer) {
            (Some(size), None) => size,
            (None, Some(buffer)) => {
                let free = numa::node_free_bytes(numa::DRAM_NODE)?;
                let size = free - buffer;
                if size <= 0 {
                    return Err(TmemError::Config(format!(
                        "DRAM buffer {buffer} leaves no budget (node free: {free})"
                    )));
                }
                size
            }
            // validate() rejected the other combinations.
            _ => unreachable!("config validation admitted a bad budget"),
        };

        Ok(Self {
            classifier: Classifier::new(cfg.hot_threshold, cfg.cool_cycles),
            predictor: Mutex::new(Predictor::new(&cfg)),
            table: PageTable::new(cfg.page_size),
            cfg,
            arena: PageArena::new(),
            hot: FifoList::new(Cohort::Hot),
            cold: FifoList::new(Cohort::Cold),
            free: FifoList::new(Cohort::Free),
            budget: DramBudget::new(dram_size),
            timing: MigrationTiming::new(),
            stats: StatCounters::new(),
            binder,
            traces: OnceCell::new(),
            samplers: OnceCell::new(),
            stats_log: OnceCell::new(),
            killed: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            start_ns: monotonic_ns(),
        })
    }

    /// Full production bring-up from the environment: config, system
    /// binder, files, samplers, workers.
    pub fn init() -> Result<Arc<Self>> {
        let cfg = Config::from_env()?;
        let mgr = Arc::new(Self::new(cfg, Arc::new(SysBinder))?);
        mgr.start()?;
        Ok(mgr)
    }

    /// Open log and trace files, open the sampler set, and spawn the worker
    /// threads: stats first, then the ingestor, then the migrator (the
    /// migrator must find the hot-cohort invariants already established by
    /// the ingestor).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        telemetry::logging::init(&self.cfg.log_dir)?;
        self.traces
            .get_or_try_init(|| TraceFiles::create(&self.cfg.log_dir))?;
        self.stats_log
            .get_or_try_init(|| StatsLog::create(&self.cfg.log_dir))?;

        let samplers = SamplerSet::open(&self.cfg)?;
        self.stats
            .internal_mem_overhead
            .fetch_add(samplers.mapped_bytes(), Ordering::Relaxed);
        if self.samplers.set(samplers).is_err() {
            return Err(TmemError::InvalidState("manager already started".into()));
        }

        let mut handles = self.handles.lock();

        let mgr = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("tiermem-stats".into())
                .spawn(move || mgr.stats_loop())?,
        );

        let mgr = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("tiermem-ingest".into())
                .spawn(move || {
                    crate::interpose::mark_thread_internal();
                    let _ = crate::sys::cpu::pin_current_thread(mgr.cfg.scan_cpu);
                    ingest::ingest_loop(&mgr);
                })?,
        );

        let mgr = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("tiermem-migrate".into())
                .spawn(move || {
                    crate::interpose::mark_thread_internal();
                    let _ = crate::sys::cpu::pin_current_thread(mgr.cfg.migrate_cpu);
                    mgr.migrate_loop();
                })?,
        );

        info!(
            dram_size = self.budget.size(),
            page_size = self.cfg.page_size,
            sample_cpus = self.cfg.sample_cpus,
            "tiermem started"
        );
        Ok(())
    }

    #[inline]
    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn traces(&self) -> Option<&TraceFiles> {
        self.traces.get()
    }

    #[inline]
    pub fn samplers(&self) -> Option<&SamplerSet> {
        self.samplers.get()
    }

    /// Cooperative shutdown: raise the kill flag, join every worker, flush
    /// the traces. Application pages stay mapped; undoing descriptor
    /// decomposition over byte-range unmaps is out of scope.
    pub fn shutdown(&self) {
        self.killed.store(true, Ordering::Relaxed);
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        if let Some(traces) = self.traces.get() {
            let _ = traces.flush();
        }
        info!("tiermem stopped");
    }

    /// Allocation-gateway entry (managed anonymous mappings only).
    pub fn allocate(&self, length: usize, prot: c_int, flags: c_int) -> Result<*mut c_void> {
        gateway::allocate(self, length, prot, flags)
    }

    /// Release-gateway entry.
    pub fn release(&self, addr: *mut c_void, length: usize) -> Result<c_int> {
        gateway::release(self, addr, length)
    }

    fn migrate_loop(&self) {
        while !self.killed() {
            match migrate::migrate_once(self) {
                MigrateOutcome::Idle => std::thread::sleep(Duration::from_micros(200)),
                _ => {}
            }
        }
    }

    fn stats_loop(&self) {
        crate::interpose::mark_thread_internal();
        if let Err(e) = crate::sys::cpu::pin_current_thread(self.cfg.stats_cpu) {
            warn!(error = %e, "stats thread pinning failed");
        }

        let mut last_emit = monotonic_ns();
        while !self.killed() {
            std::thread::sleep(Duration::from_millis(100));
            let now = monotonic_ns();
            if now - last_emit < 1_000_000_000 {
                continue;
            }
            last_emit = now;

            let snap = self.stats.snapshot(
                true,
                self.budget.used(),
                self.budget.size(),
                self.hot.len(),
                self.cold.len(),
                self.free.len(),
            );
            if let Some(log) = self.stats_log.get() {
                if let Err(e) = log.emit(elapsed_secs(self.start_ns, now), &snap) {
                    warn!(error = %e, "stats emit failed");
                }
            }
            if self.cfg.stats_ring_reset {
                if let Some(samplers) = self.samplers.get() {
                    samplers.reset_all();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binder that records every bind without touching the kernel.
    #[derive(Debug, Default)]
    pub struct RecordingBinder {
        pub binds: Mutex<Vec<(u64, u64, u32)>>,
    }

    impl MemoryBinder for RecordingBinder {
        fn bind(&self, addr: u64, len: u64, node: u32) -> crate::error::Result<()> {
            self.binds.lock().push((addr, len, node));
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            dram_size: Some(2 << 30),
            log_dir: std::env::temp_dir(),
            ..Config::default()
        }
    }

    #[test]
    fn new_manager_resolves_absolute_budget() {
        let mgr = TmemManager::new(test_config(), Arc::new(RecordingBinder::default())).unwrap();
        assert_eq!(mgr.budget.size(), 2 << 30);
        assert_eq!(mgr.budget.used(), 0);
        assert!(mgr.hot.is_empty());
        assert!(!mgr.killed());
    }

    #[test]
    fn conflicting_budget_is_fatal() {
        let mut cfg = test_config();
        cfg.dram_buffer = Some(1 << 30);
        let err = TmemManager::new(cfg, Arc::new(RecordingBinder::default())).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn shutdown_without_start_is_clean() {
        let mgr = TmemManager::new(test_config(), Arc::new(RecordingBinder::default())).unwrap();
        mgr.shutdown();
        assert!(mgr.killed());
    }
}
