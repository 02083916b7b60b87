// Per-second stats file.
//
// One human-readable line plus one JSON line per emit, both flushed so the
// log survives an abrupt process end.

use crate::error::Result;
use crate::telemetry::StatsSnapshot;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct StatsLog {
    file: Mutex<BufWriter<File>>,
}

impl StatsLog {
    pub fn create(log_dir: &Path) -> Result<Self> {
        let file = File::create(log_dir.join("stats.txt"))?;
        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn emit(&self, elapsed_secs: f64, snap: &StatsSnapshot) -> Result<()> {
        let mut file = self.file.lock();
        writeln!(
            file,
            "[{elapsed_secs:.1}s] dram: [{}/{}]\taccesses l/r: [{}/{}]\tpromote/demote: [{}/{}]\t\
             aborts: [{}]\tthrottle/unthrottle: [{}/{}]\tpredicted: [{}]\tunknown: [{}]",
            snap.dram_used,
            snap.dram_size,
            snap.local_accesses,
            snap.remote_accesses,
            snap.promotions,
            snap.demotions,
            snap.cold_exhaustion_aborts,
            snap.throttles,
            snap.unthrottles,
            snap.predicted_promotes,
            snap.unknown_samples,
        )?;
        writeln!(file, "{}", serde_json::to_string(snap)?)?;
        file.flush()?;
        Ok(())
    }
}
