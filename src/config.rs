// Manager configuration
// Compiled defaults matching the reference deployment, overridable through
// TIERMEM_* environment variables read once at init.

use crate::error::{Result, TmemError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tier page size: the migration granularity (2 MiB).
pub const DEFAULT_PAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Base page size (4 KiB); the trailing descriptor of an allocation may be
/// this short but never shorter.
pub const BASE_PAGE_SIZE: u64 = 4096;

/// Per-page neighbor slots kept by the predictor.
pub const MAX_NEIGHBORS: usize = 4;

/// Sliding sample-history window length.
pub const HISTORY_SIZE: usize = 16;

/// Default DRAM budget when neither env knob is supplied to a programmatic
/// config (2 GiB).
pub const DEFAULT_DRAM_SIZE: i64 = 2 * 1024 * 1024 * 1024;

/// Lookahead strategy for the neighbor predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lookahead {
    Bfs,
    Dfs,
}

/// Runtime configuration.
///
/// Exactly one of `dram_size` / `dram_buffer` must be set: either an absolute
/// DRAM budget in bytes, or a number of bytes to leave free on the DRAM node
/// (the budget is then derived from the node's free memory at init).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tier page size in bytes; must be a multiple of the base page size.
    pub page_size: u64,
    /// Absolute DRAM budget in bytes.
    pub dram_size: Option<i64>,
    /// Bytes to leave free on the DRAM node.
    pub dram_buffer: Option<i64>,
    /// Hardware sample period (events between samples).
    pub sample_period: u64,
    /// Number of sampled CPUs; each gets a (DRAM_READ, REMOTE_READ) ring pair.
    pub sample_cpus: usize,
    /// Ring-buffer size per sampler, in kernel pages (1 metadata + 2^n data).
    pub perf_pages: usize,
    /// Access count at which a page is classified hot.
    pub hot_threshold: u64,
    /// Cycle budget between cooling epochs.
    pub cool_cycles: u64,
    /// Maximum lookahead depth for the predictor.
    pub pred_depth: u32,
    /// BFS (default) or DFS lookahead.
    pub lookahead: Lookahead,
    /// Distance-metric weights; nonnegative, summing to 1.
    pub w_va: f64,
    pub w_cyc: f64,
    pub w_ip: f64,
    /// Distance EMA decay rates.
    pub dec_up: f64,
    pub dec_down: f64,
    pub dec_dist: f64,
    /// CPU the ingest loop is pinned to.
    pub scan_cpu: usize,
    /// CPU the migration worker is pinned to.
    pub migrate_cpu: usize,
    /// CPU the stats emitter is pinned to.
    pub stats_cpu: usize,
    /// Directory for trace files and logs.
    pub log_dir: PathBuf,
    /// Reset the sample rings whenever the stats emitter fires.
    pub stats_ring_reset: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            dram_size: Some(DEFAULT_DRAM_SIZE),
            dram_buffer: None,
            sample_period: 100,
            sample_cpus: 16,
            perf_pages: 1 + (1 << 16),
            hot_threshold: 8,
            cool_cycles: 10_000_000,
            pred_depth: 2,
            lookahead: Lookahead::Bfs,
            w_va: 0.33,
            w_cyc: 0.33,
            w_ip: 0.33,
            dec_up: 0.01,
            dec_down: 0.0001,
            dec_dist: 0.0001,
            scan_cpu: 0,
            migrate_cpu: 1,
            stats_cpu: 2,
            log_dir: PathBuf::from("."),
            stats_ring_reset: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| TmemError::Config(format!("{key}: cannot parse {v:?}"))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Build a configuration from the environment. The DRAM budget must come
    /// from the environment here: exactly one of TIERMEM_DRAM_SIZE and
    /// TIERMEM_DRAM_BUFFER.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config {
            dram_size: env_parse::<i64>("TIERMEM_DRAM_SIZE")?,
            dram_buffer: env_parse::<i64>("TIERMEM_DRAM_BUFFER")?,
            ..Config::default()
        };

        if let Some(v) = env_parse::<u64>("TIERMEM_PAGE_SIZE")? {
            cfg.page_size = v;
        }
        if let Some(v) = env_parse::<u64>("TIERMEM_SAMPLE_PERIOD")? {
            cfg.sample_period = v;
        }
        if let Some(v) = env_parse::<usize>("TIERMEM_SAMPLE_CPUS")? {
            cfg.sample_cpus = v;
        }
        if let Some(v) = env_parse::<usize>("TIERMEM_PERF_PAGES")? {
            cfg.perf_pages = v;
        }
        if let Some(v) = env_parse::<u64>("TIERMEM_HOT_THRESHOLD")? {
            cfg.hot_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("TIERMEM_COOL_CYCLES")? {
            cfg.cool_cycles = v;
        }
        if let Some(v) = env_parse::<u32>("TIERMEM_PRED_DEPTH")? {
            cfg.pred_depth = v;
        }
        if let Some(v) = env_parse::<u8>("TIERMEM_PRED_BFS")? {
            cfg.lookahead = if v != 0 { Lookahead::Bfs } else { Lookahead::Dfs };
        }
        if let Some(v) = env_parse::<f64>("TIERMEM_W_VA")? {
            cfg.w_va = v;
        }
        if let Some(v) = env_parse::<f64>("TIERMEM_W_CYC")? {
            cfg.w_cyc = v;
        }
        if let Some(v) = env_parse::<f64>("TIERMEM_W_IP")? {
            cfg.w_ip = v;
        }
        if let Some(v) = env_parse::<usize>("TIERMEM_SCAN_CPU")? {
            cfg.scan_cpu = v;
        }
        if let Some(v) = env_parse::<usize>("TIERMEM_MIGRATE_CPU")? {
            cfg.migrate_cpu = v;
        }
        if let Some(v) = env_parse::<usize>("TIERMEM_STATS_CPU")? {
            cfg.stats_cpu = v;
        }
        if let Some(v) = env_parse::<String>("TIERMEM_LOG_DIR")? {
            cfg.log_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<u8>("TIERMEM_STATS_RING_RESET")? {
            cfg.stats_ring_reset = v != 0;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate invariants shared by every construction path.
    pub fn validate(&self) -> Result<()> {
        match (self.dram_size, self.dram_buffer) {
            (Some(_), Some(_)) => {
                return Err(TmemError::Config(
                    "both TIERMEM_DRAM_SIZE and TIERMEM_DRAM_BUFFER set; pick one".into(),
                ))
            }
            (None, None) => {
                return Err(TmemError::Config(
                    "one of TIERMEM_DRAM_SIZE / TIERMEM_DRAM_BUFFER is required".into(),
                ))
            }
            _ => {}
        }

        if self.page_size < BASE_PAGE_SIZE || self.page_size % BASE_PAGE_SIZE != 0 {
            return Err(TmemError::Config(format!(
                "page_size {} is not a multiple of the base page size",
                self.page_size
            )));
        }
        if !self.page_size.is_power_of_two() {
            return Err(TmemError::Config(format!(
                "page_size {} is not a power of two",
                self.page_size
            )));
        }

        if self.w_va < 0.0 || self.w_cyc < 0.0 || self.w_ip < 0.0 {
            return Err(TmemError::Config("distance weights must be nonnegative".into()));
        }
        let sum = self.w_va + self.w_cyc + self.w_ip;
        if (sum - 1.0).abs() > 1e-2 {
            return Err(TmemError::Config(format!(
                "distance weights sum to {sum}, expected 1"
            )));
        }

        if self.sample_cpus == 0 {
            return Err(TmemError::Config("sample_cpus must be nonzero".into()));
        }
        if self.hot_threshold == 0 {
            return Err(TmemError::Config("hot_threshold must be nonzero".into()));
        }

        Ok(())
    }

    /// Mask that rounds a virtual address down to a tier-page boundary.
    #[inline]
    pub fn page_mask(&self) -> u64 {
        !(self.page_size - 1)
    }

    /// Mask that rounds a virtual address down to a base-page boundary.
    #[inline]
    pub fn base_page_mask(&self) -> u64 {
        !(BASE_PAGE_SIZE - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn budget_knobs_are_exclusive() {
        let mut cfg = Config::default();
        cfg.dram_buffer = Some(1 << 30);
        assert!(cfg.validate().is_err());

        cfg.dram_size = None;
        assert!(cfg.validate().is_ok());

        cfg.dram_buffer = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unaligned_page_size() {
        let mut cfg = Config::default();
        cfg.page_size = 3 * 1024;
        assert!(cfg.validate().is_err());

        cfg.page_size = 6 * 1024 * 1024; // multiple of 4K but not a power of two
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_weights() {
        let mut cfg = Config::default();
        cfg.w_va = -0.1;
        assert!(cfg.validate().is_err());

        cfg.w_va = 0.9;
        cfg.w_cyc = 0.9;
        cfg.w_ip = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn page_masks() {
        let cfg = Config::default();
        assert_eq!(0x7fff_fecd_1234 & cfg.page_mask(), 0x7fff_fe00_0000);
        assert_eq!(0x7fff_fecd_1234 & cfg.base_page_mask(), 0x7fff_fecd_1000);
    }
}
