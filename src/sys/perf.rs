// Precise-event sampling (PEBS) via perf_event_open(2).
//
// The attr and mmap-page layouts are declared here mirroring
// linux/perf_event.h; only the fields this crate programs are named, the
// rest is reserved padding. Attr size is pinned to PERF_ATTR_SIZE_VER5.

use crate::error::{Result, TmemError};
use std::io;
use std::os::raw::{c_int, c_ulong, c_void};

// Record header types consumed by the ingestor.
pub const PERF_RECORD_LOST: u32 = 2;
pub const PERF_RECORD_THROTTLE: u32 = 5;
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;
pub const PERF_RECORD_SAMPLE: u32 = 9;

const PERF_TYPE_RAW: u32 = 4;
const PERF_SAMPLE_IP: u64 = 1 << 0;
const PERF_SAMPLE_ADDR: u64 = 1 << 3;

// attr.flags bit positions (linux/perf_event.h bitfield order).
const ATTR_EXCLUDE_KERNEL: u64 = 1 << 5;
const ATTR_EXCLUDE_HV: u64 = 1 << 6;
const ATTR_PRECISE_IP_SHIFT: u32 = 15; // 2-bit field
const ATTR_EXCLUDE_CALLCHAIN_KERNEL: u64 = 1 << 21;
const ATTR_EXCLUDE_CALLCHAIN_USER: u64 = 1 << 22;

const PERF_ATTR_SIZE_VER5: u32 = 112;

// ioctl requests (no argument structs, so no _IOC macro plumbing needed).
const PERF_EVENT_IOC_ENABLE: c_ulong = 0x2400;
const PERF_EVENT_IOC_DISABLE: c_ulong = 0x2401;
const PERF_EVENT_IOC_RESET: c_ulong = 0x2403;

/// perf_event_attr, truncated at PERF_ATTR_SIZE_VER5.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub reserved_2: u16,
}

/// Reader-visible header of the perf ring mapping. `data_head` is advanced
/// by the kernel; the consumer publishes `data_tail`.
#[repr(C)]
pub struct PerfEventMmapPage {
    pub version: u32,
    pub compat_version: u32,
    pub lock: u32,
    pub index: u32,
    pub offset: i64,
    pub time_enabled: u64,
    pub time_running: u64,
    pub capabilities: u64,
    pub pmc_width: u16,
    pub time_shift: u16,
    pub time_mult: u32,
    pub time_offset: u64,
    pub time_zero: u64,
    pub size: u32,
    pub reserved_1: u32,
    pub time_cycles: u64,
    pub time_mask: u64,
    pub reserved: [u8; 928],
    pub data_head: u64,
    pub data_tail: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub aux_head: u64,
    pub aux_tail: u64,
    pub aux_offset: u64,
    pub aux_size: u64,
}

/// Framing header preceding every ring record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PerfEventHeader {
    pub type_: u32,
    pub misc: u16,
    pub size: u16,
}

/// Body of a PERF_RECORD_SAMPLE with sample_type = IP | ADDR.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfSampleBody {
    pub ip: u64,
    pub addr: u64,
}

fn perf_event_open(
    attr: &PerfEventAttr,
    pid: libc::pid_t,
    cpu: c_int,
    group_fd: c_int,
    flags: c_ulong,
) -> io::Result<c_int> {
    // SAFETY: attr is a fully initialized repr(C) struct of the advertised size.
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const PerfEventAttr,
            pid,
            cpu,
            group_fd,
            flags,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd as c_int)
}

/// One (CPU, event) sampler: the perf fd plus its mapped ring.
pub struct PerfSampler {
    fd: c_int,
    ring: *mut PerfEventMmapPage,
    mmap_len: usize,
}

// SAFETY: the ring mapping is drained by a single consumer thread; the
// fd-based control operations (enable/disable/reset) are kernel-side
// thread-safe. Shared only behind the manager.
unsafe impl Send for PerfSampler {}
unsafe impl Sync for PerfSampler {}

impl PerfSampler {
    /// Open a raw hardware event on `cpu` and map its sample ring.
    ///
    /// `perf_pages` counts kernel pages: one metadata page plus a
    /// power-of-two data area, matching the perf mmap contract.
    pub fn open(config: u64, cpu: c_int, sample_period: u64, perf_pages: usize) -> Result<Self> {
        let attr = PerfEventAttr {
            type_: PERF_TYPE_RAW,
            size: PERF_ATTR_SIZE_VER5,
            config,
            sample_period,
            sample_type: PERF_SAMPLE_IP | PERF_SAMPLE_ADDR,
            read_format: 0,
            flags: ATTR_EXCLUDE_KERNEL
                | ATTR_EXCLUDE_HV
                | ATTR_EXCLUDE_CALLCHAIN_KERNEL
                | ATTR_EXCLUDE_CALLCHAIN_USER
                | (1u64 << ATTR_PRECISE_IP_SHIFT),
            wakeup_events: 0,
            bp_type: 0,
            config1: 0,
            config2: 0,
            branch_sample_type: 0,
            sample_regs_user: 0,
            sample_stack_user: 0,
            clockid: 0,
            sample_regs_intr: 0,
            aux_watermark: 0,
            sample_max_stack: 0,
            reserved_2: 0,
        };

        let fd = perf_event_open(&attr, -1, cpu, -1, 0).map_err(|e| {
            TmemError::Sampler(format!("perf_event_open(config 0x{config:x}, cpu {cpu}): {e}"))
        })?;

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let mmap_len = page_size * perf_pages;
        // SAFETY: mapping a perf fd per the perf_event_open(2) contract.
        let ring = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ring == libc::MAP_FAILED {
            let e = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TmemError::Sampler(format!(
                "mmap perf ring ({mmap_len} bytes, cpu {cpu}): {e}"
            )));
        }

        Ok(Self {
            fd,
            ring: ring as *mut PerfEventMmapPage,
            mmap_len,
        })
    }

    /// Pointer to the mapped metadata page; the sample data area follows at
    /// `data_offset`.
    #[inline]
    pub fn mmap_page(&self) -> *mut PerfEventMmapPage {
        self.ring
    }

    /// Bytes mapped for this sampler (metadata page + data area).
    #[inline]
    pub fn mapped_len(&self) -> usize {
        self.mmap_len
    }

    fn ioctl(&self, req: c_ulong) -> Result<()> {
        // SAFETY: argumentless perf ioctl on an owned fd.
        let rc = unsafe { libc::ioctl(self.fd, req as _, 0) };
        if rc != 0 {
            return Err(TmemError::Sampler(format!(
                "perf ioctl 0x{req:x}: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    pub fn enable(&self) -> Result<()> {
        self.ioctl(PERF_EVENT_IOC_ENABLE)
    }

    pub fn disable(&self) -> Result<()> {
        self.ioctl(PERF_EVENT_IOC_DISABLE)
    }

    pub fn reset(&self) -> Result<()> {
        self.ioctl(PERF_EVENT_IOC_RESET)
    }

    /// Disable, reset, and re-enable the event. Recovers a sampler whose
    /// kernel side stopped producing records.
    pub fn cycle(&self) -> Result<()> {
        self.disable()?;
        self.reset()?;
        self.enable()
    }
}

impl Drop for PerfSampler {
    fn drop(&mut self) {
        // SAFETY: ring/fd were produced by mmap/perf_event_open above and are
        // not used after drop.
        unsafe {
            libc::munmap(self.ring as *mut c_void, self.mmap_len);
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_layout_matches_ver5() {
        assert_eq!(std::mem::size_of::<PerfEventAttr>(), 112);
        assert_eq!(PERF_ATTR_SIZE_VER5 as usize, std::mem::size_of::<PerfEventAttr>());
    }

    #[test]
    fn mmap_page_ring_fields_at_kernel_offsets() {
        // data_head sits at offset 1024 in linux/perf_event.h; the reserved
        // padding above must keep it there.
        assert_eq!(std::mem::offset_of!(PerfEventMmapPage, data_head), 1024);
        assert_eq!(std::mem::offset_of!(PerfEventMmapPage, data_tail), 1032);
        assert_eq!(std::mem::offset_of!(PerfEventMmapPage, data_offset), 1040);
        assert_eq!(std::mem::offset_of!(PerfEventMmapPage, data_size), 1048);
    }

    #[test]
    fn header_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<PerfEventHeader>(), 8);
        assert_eq!(std::mem::size_of::<PerfSampleBody>(), 16);
    }
}
