// Binary sample traces.
//
// Two append-only files: trace.bin gets every parsed sample, tmem_trace.bin
// only the samples that resolved to a tracked page. Records are packed
// little-endian, 29 bytes each.

use crate::error::Result;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Packed trace record: {cyc, va, ip, cpu, evt}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub cyc: u64,
    pub va: u64,
    pub ip: u64,
    pub cpu: u32,
    pub evt: u8,
}

/// Packed size on disk.
pub const TRACE_RECORD_BYTES: usize = 29;

impl TraceRecord {
    pub fn to_bytes(&self) -> [u8; TRACE_RECORD_BYTES] {
        let mut buf = [0u8; TRACE_RECORD_BYTES];
        buf[0..8].copy_from_slice(&self.cyc.to_le_bytes());
        buf[8..16].copy_from_slice(&self.va.to_le_bytes());
        buf[16..24].copy_from_slice(&self.ip.to_le_bytes());
        buf[24..28].copy_from_slice(&self.cpu.to_le_bytes());
        buf[28] = self.evt;
        buf
    }

    pub fn from_bytes(buf: &[u8; TRACE_RECORD_BYTES]) -> Self {
        Self {
            cyc: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            va: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            ip: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            cpu: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            evt: buf[28],
        }
    }
}

pub struct TraceWriter {
    file: Mutex<BufWriter<File>>,
}

impl TraceWriter {
    fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(BufWriter::new(File::create(path)?)),
        })
    }

    pub fn append(&self, rec: &TraceRecord) {
        // A failed trace write is not worth stalling ingestion over.
        let _ = self.file.lock().write_all(&rec.to_bytes());
    }

    pub fn flush(&self) -> Result<()> {
        self.file.lock().flush()?;
        Ok(())
    }
}

pub struct TraceFiles {
    /// Every parsed sample.
    pub raw: TraceWriter,
    /// Samples that resolved to a tracked page.
    pub tracked: TraceWriter,
}

impl TraceFiles {
    pub fn create(log_dir: &Path) -> Result<Self> {
        Ok(Self {
            raw: TraceWriter::create(&log_dir.join("trace.bin"))?,
            tracked: TraceWriter::create(&log_dir.join("tmem_trace.bin"))?,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.raw.flush()?;
        self.tracked.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_packs_to_29_bytes() {
        let rec = TraceRecord {
            cyc: 0x0102_0304_0506_0708,
            va: 0x7fff_0000_1000,
            ip: 0x0040_1234,
            cpu: 6,
            evt: 1,
        };
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), 29);
        assert_eq!(TraceRecord::from_bytes(&bytes), rec);
        // Little-endian low byte first.
        assert_eq!(bytes[0], 0x08);
        assert_eq!(bytes[28], 1);
    }

    #[test]
    fn writers_append_packed_records() {
        let dir = tempfile::tempdir().unwrap();
        let traces = TraceFiles::create(dir.path()).unwrap();

        let rec = TraceRecord { cyc: 1, va: 2, ip: 3, cpu: 4, evt: 0 };
        traces.raw.append(&rec);
        traces.raw.append(&rec);
        traces.tracked.append(&rec);
        traces.flush().unwrap();

        let raw = std::fs::read(dir.path().join("trace.bin")).unwrap();
        let tracked = std::fs::read(dir.path().join("tmem_trace.bin")).unwrap();
        assert_eq!(raw.len(), 2 * TRACE_RECORD_BYTES);
        assert_eq!(tracked.len(), TRACE_RECORD_BYTES);

        let parsed = TraceRecord::from_bytes(raw[0..29].try_into().unwrap());
        assert_eq!(parsed, rec);
    }
}
