// Hardware-sample ingestion: per-(CPU, event) PEBS samplers, the lossy
// ring-buffer consumer, the ingest loop, and the binary trace writers.

pub mod ingest;
pub mod ring;
pub mod sampler;
pub mod trace;

pub use ring::{RingRecord, RingView};
pub use sampler::SamplerSet;
pub use trace::{TraceFiles, TraceRecord};

/// Sampled event kinds; one ring per (CPU, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    /// MEM_LOAD_L3_MISS_RETIRED.LOCAL_DRAM
    DramRead = 0,
    /// MEM_LOAD_RETIRED.LOCAL_PMM
    RemoteRead = 1,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::DramRead, EventKind::RemoteRead];

    /// Raw PMU config for this event.
    #[inline]
    pub fn raw_config(self) -> u64 {
        match self {
            EventKind::DramRead => 0x1d3,
            EventKind::RemoteRead => 0x4d3,
        }
    }
}
