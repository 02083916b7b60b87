// Raw anonymous mappings via direct syscalls.
//
// The gateway and the arena must not route their own mappings through libc's
// mmap symbol: when the crate is preloaded, that symbol is ours. Issuing the
// syscall directly keeps internal allocations invisible to the interposer.

use crate::error::{Result, TmemError};
use std::io;
use std::os::raw::{c_int, c_void};

/// Forward an mmap request to the kernel unchanged.
///
/// # Safety
/// Same contract as mmap(2); `addr` is a hint or a fixed mapping target.
#[inline]
pub unsafe fn raw_mmap(
    addr: *mut c_void,
    length: usize,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: libc::off_t,
) -> *mut c_void {
    libc::syscall(libc::SYS_mmap, addr, length, prot, flags, fd, offset) as *mut c_void
}

/// Forward a munmap request to the kernel unchanged.
///
/// # Safety
/// Same contract as munmap(2).
#[inline]
pub unsafe fn raw_munmap(addr: *mut c_void, length: usize) -> c_int {
    libc::syscall(libc::SYS_munmap, addr, length) as c_int
}

/// Map a private anonymous read-write region.
pub fn map_anon(length: usize) -> Result<*mut u8> {
    // SAFETY: NULL hint, anonymous mapping; the kernel picks the address.
    let ptr = unsafe {
        raw_mmap(
            std::ptr::null_mut(),
            length,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(TmemError::Map(format!(
            "mmap({length} bytes): {}",
            io::Error::last_os_error()
        )));
    }
    Ok(ptr as *mut u8)
}

/// Whether an intercepted request is one the gateway manages: private
/// anonymous memory, address chosen by the kernel.
#[inline]
pub fn is_managed_request(addr: *mut c_void, flags: c_int, fd: c_int) -> bool {
    addr.is_null()
        && fd == -1
        && flags & libc::MAP_ANONYMOUS != 0
        && flags & libc::MAP_PRIVATE != 0
        && flags & libc::MAP_FIXED == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_and_unmap_roundtrip() {
        let len = 1 << 20;
        let ptr = map_anon(len).unwrap();
        assert!(!ptr.is_null());
        // Touch both ends; the mapping must be usable.
        unsafe {
            ptr.write(0xA5);
            ptr.add(len - 1).write(0x5A);
            assert_eq!(raw_munmap(ptr as *mut c_void, len), 0);
        }
    }

    #[test]
    fn managed_request_filter() {
        let anon = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        assert!(is_managed_request(std::ptr::null_mut(), anon, -1));
        assert!(!is_managed_request(std::ptr::null_mut(), anon, 3));
        assert!(!is_managed_request(std::ptr::null_mut(), libc::MAP_SHARED, -1));
        assert!(!is_managed_request(
            std::ptr::null_mut(),
            anon | libc::MAP_FIXED,
            -1
        ));
        assert!(!is_managed_request(4096 as *mut c_void, anon, -1));
    }
}
