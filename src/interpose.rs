// Syscall interposition surface.
//
// Built as a cdylib, this crate exports mmap/munmap; LD_PRELOAD resolves
// the application's libc calls here and managed anonymous mappings are
// routed through the allocation gateway. Everything else, and every call
// made while the re-entrancy guard is up, is forwarded to the kernel
// unchanged.
//
// The manager comes up lazily on the first managed request. If no DRAM
// budget is present in the environment the hooks disarm themselves: a
// preload without a budget has nothing to manage. A present-but-invalid
// configuration is fatal, matching init semantics.

use crate::engine::manager::TmemManager;
use crate::sys::mm;
use once_cell::sync::{Lazy, OnceCell};
use std::cell::Cell;
use std::os::raw::{c_int, c_void};
use std::sync::Arc;

thread_local! {
    static INTERNAL: Cell<bool> = const { Cell::new(false) };
}

/// Permanently mark the calling thread internal (worker threads).
pub fn mark_thread_internal() {
    INTERNAL.with(|flag| flag.set(true));
}

#[inline]
pub fn is_internal() -> bool {
    INTERNAL.with(|flag| flag.get())
}

/// Scoped re-entrancy guard: any mapping the guarded code performs goes
/// straight to the kernel instead of recursing into the gateway.
pub struct InternalGuard {
    prev: bool,
}

impl InternalGuard {
    pub fn enter() -> Self {
        let prev = INTERNAL.with(|flag| flag.replace(true));
        Self { prev }
    }
}

impl Drop for InternalGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        INTERNAL.with(|flag| flag.set(prev));
    }
}

/// Hooks stay dormant unless a DRAM budget knob is in the environment.
static ARMED: Lazy<bool> = Lazy::new(|| {
    std::env::var_os("TIERMEM_DRAM_SIZE").is_some()
        || std::env::var_os("TIERMEM_DRAM_BUFFER").is_some()
});

static MANAGER: OnceCell<Arc<TmemManager>> = OnceCell::new();

extern "C" fn shutdown_hook() {
    if let Some(mgr) = MANAGER.get() {
        mgr.shutdown();
    }
}

/// The process-wide manager, brought up on first use. An invalid
/// configuration aborts: an application half-managed is worse than one
/// that never started.
fn manager() -> &'static Arc<TmemManager> {
    MANAGER.get_or_init(|| {
        let _guard = InternalGuard::enter();
        match TmemManager::init() {
            Ok(mgr) => {
                // SAFETY: registering a plain extern "C" hook.
                unsafe { libc::atexit(shutdown_hook) };
                mgr
            }
            Err(e) => {
                eprintln!("tiermem: fatal init error: {e}");
                std::process::abort();
            }
        }
    })
}

/// Embedding API: bring the manager up explicitly (same path the hooks
/// take) and get a handle to it.
pub fn global() -> &'static Arc<TmemManager> {
    manager()
}

#[no_mangle]
pub unsafe extern "C" fn mmap(
    addr: *mut c_void,
    length: libc::size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: libc::off_t,
) -> *mut c_void {
    if is_internal() || !*ARMED || !mm::is_managed_request(addr, flags, fd) {
        return mm::raw_mmap(addr, length, prot, flags, fd, offset);
    }

    let _guard = InternalGuard::enter();
    match manager().allocate(length, prot, flags) {
        Ok(ptr) => ptr,
        Err(_) => {
            *libc::__errno_location() = libc::ENOMEM;
            libc::MAP_FAILED
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn munmap(addr: *mut c_void, length: libc::size_t) -> c_int {
    if is_internal() || !*ARMED {
        return mm::raw_munmap(addr, length);
    }
    // Nothing is tracked before the first managed allocation.
    let Some(mgr) = MANAGER.get() else {
        return mm::raw_munmap(addr, length);
    };

    let _guard = InternalGuard::enter();
    match mgr.release(addr, length) {
        Ok(rc) => rc,
        Err(_) => {
            *libc::__errno_location() = libc::EINVAL;
            -1
        }
    }
}
