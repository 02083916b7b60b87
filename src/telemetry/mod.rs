// Telemetry: central counters, the 1 Hz stats emitter, and log-file setup.

pub mod counters;
pub mod logging;
pub mod stats_log;

pub use counters::{StatCounters, StatsSnapshot};
pub use stats_log::StatsLog;
