// Lossy perf ring-buffer consumer.
//
// The kernel advances the free-running `data_head`; the consumer owns
// `data_tail`. Head is loaded with acquire ordering before any record data
// is read, tail is published with release ordering after. A record that
// would wrap the ring boundary is unrecoverable at this sample type, so the
// remainder of the ring is dropped and counted; the consumer never blocks
// the producer.

use crate::sys::perf::{
    PerfEventHeader, PerfEventMmapPage, PerfSampleBody, PERF_RECORD_LOST, PERF_RECORD_SAMPLE,
    PERF_RECORD_THROTTLE, PERF_RECORD_UNTHROTTLE,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// One parsed ring record, or the wrap-drop outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingRecord {
    Sample { ip: u64, addr: u64 },
    Throttle,
    Unthrottle,
    Lost,
    Unknown(u32),
    /// Header or body straddled the ring end; the rest of the ring was
    /// discarded (tail advanced to head).
    WrapDrop,
}

/// Consumer view over one mapped perf ring.
pub struct RingView {
    header: *mut PerfEventMmapPage,
}

impl RingView {
    /// # Safety
    /// `header` must point at a live perf mmap page whose data area stays
    /// mapped for the view's lifetime, with this thread as sole consumer.
    pub unsafe fn new(header: *mut PerfEventMmapPage) -> Self {
        Self { header }
    }

    #[inline]
    fn head(&self) -> &AtomicU64 {
        // SAFETY: data_head is a plain u64 the kernel updates; atomic access
        // through the mapped page is the defined protocol.
        unsafe { AtomicU64::from_ptr(std::ptr::addr_of_mut!((*self.header).data_head)) }
    }

    #[inline]
    fn tail(&self) -> &AtomicU64 {
        // SAFETY: as above; data_tail is consumer-owned.
        unsafe { AtomicU64::from_ptr(std::ptr::addr_of_mut!((*self.header).data_tail)) }
    }

    #[inline]
    fn data(&self) -> (*const u8, u64) {
        // SAFETY: offsets were written by the kernel at mmap time.
        unsafe {
            let off = (*self.header).data_offset;
            let size = (*self.header).data_size;
            ((self.header as *const u8).add(off as usize), size)
        }
    }

    /// Parse and consume the next record, or `None` when the ring is empty
    /// or unmapped.
    pub fn next_record(&mut self) -> Option<RingRecord> {
        let (data, data_size) = self.data();
        if data_size == 0 {
            return None;
        }

        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Relaxed);
        debug_assert!(tail <= head, "ring tail ran past head");
        if tail == head {
            return None;
        }

        let off = tail % data_size;

        // Header split across the ring end: drop the remainder.
        if off + std::mem::size_of::<PerfEventHeader>() as u64 > data_size {
            self.tail().store(head, Ordering::Release);
            return Some(RingRecord::WrapDrop);
        }

        // SAFETY: off + header fits in the mapped data area; unaligned read.
        let hdr = unsafe {
            std::ptr::read_unaligned(data.add(off as usize) as *const PerfEventHeader)
        };

        // A zero-size or wrapping body is equally unrecoverable.
        if hdr.size == 0 || off + hdr.size as u64 > data_size {
            self.tail().store(head, Ordering::Release);
            return Some(RingRecord::WrapDrop);
        }

        let record = match hdr.type_ {
            PERF_RECORD_SAMPLE => {
                let body_len = hdr.size as usize - std::mem::size_of::<PerfEventHeader>();
                if body_len == std::mem::size_of::<PerfSampleBody>() {
                    // SAFETY: body verified to lie inside the data area.
                    let body = unsafe {
                        std::ptr::read_unaligned(
                            data.add(off as usize + std::mem::size_of::<PerfEventHeader>())
                                as *const PerfSampleBody,
                        )
                    };
                    RingRecord::Sample {
                        ip: body.ip,
                        addr: body.addr,
                    }
                } else {
                    // Sample layout does not match the programmed
                    // sample_type; skip the record.
                    RingRecord::Unknown(hdr.type_)
                }
            }
            PERF_RECORD_THROTTLE => RingRecord::Throttle,
            PERF_RECORD_UNTHROTTLE => RingRecord::Unthrottle,
            PERF_RECORD_LOST => RingRecord::Lost,
            other => RingRecord::Unknown(other),
        };

        self.tail().store(tail + hdr.size as u64, Ordering::Release);
        Some(record)
    }
}
