// DRAM accounting: capacity, bytes bound to the fast tier, and the brief
// allocator fence the migrator raises while committing a tier swap.

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

pub struct DramBudget {
    size: i64,
    used: AtomicI64,
    fence: AtomicBool,
}

impl DramBudget {
    pub fn new(size: i64) -> Self {
        Self {
            size,
            used: AtomicI64::new(0),
            fence: AtomicBool::new(false),
        }
    }

    /// DRAM capacity in bytes.
    #[inline]
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Bytes currently bound to DRAM.
    #[inline]
    pub fn used(&self) -> i64 {
        self.used.load(Ordering::Acquire)
    }

    /// Capacity remaining; can be read mid-migration and may be momentarily
    /// conservative, never optimistic past the fence.
    #[inline]
    pub fn bytes_free(&self) -> i64 {
        self.size - self.used()
    }

    /// Counter-style adjustment (allocation/release bookkeeping).
    #[inline]
    pub fn add_used(&self, delta: i64) {
        let prev = self.used.fetch_add(delta, Ordering::Relaxed);
        debug_assert!(prev + delta >= 0, "dram_used went negative");
    }

    /// Commit that closes a migration; release ordering pairs with the
    /// acquire in `used()` so the new accounting is visible before the fence
    /// drops.
    #[inline]
    pub fn commit_used(&self, delta: i64) {
        let prev = self.used.fetch_add(delta, Ordering::Release);
        debug_assert!(prev + delta >= 0, "dram_used went negative");
    }

    /// Raise the allocator fence for the duration of the returned guard.
    pub fn fence(&self) -> FenceGuard<'_> {
        self.fence.store(true, Ordering::Release);
        FenceGuard { budget: self }
    }

    /// Spin until the migrator's fence is down.
    pub fn wait_fence(&self) {
        let backoff = Backoff::new();
        while self.fence.load(Ordering::Acquire) {
            backoff.snooze();
        }
    }

    #[inline]
    pub fn fenced(&self) -> bool {
        self.fence.load(Ordering::Acquire)
    }
}

/// RAII fence: dropping always lowers it, abort paths included.
pub struct FenceGuard<'a> {
    budget: &'a DramBudget,
}

impl Drop for FenceGuard<'_> {
    fn drop(&mut self) {
        self.budget.fence.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: i64 = 1024 * 1024 * 1024;

    #[test]
    fn accounting() {
        let budget = DramBudget::new(2 * GIB);
        assert_eq!(budget.bytes_free(), 2 * GIB);

        budget.add_used(GIB);
        budget.add_used(GIB / 2);
        assert_eq!(budget.used(), GIB + GIB / 2);
        assert_eq!(budget.bytes_free(), GIB / 2);

        budget.add_used(-GIB);
        assert_eq!(budget.used(), GIB / 2);
    }

    #[test]
    fn fence_guard_always_releases() {
        let budget = DramBudget::new(GIB);
        {
            let _guard = budget.fence();
            assert!(budget.fenced());
        }
        assert!(!budget.fenced());

        // Abort-style early return still lowers the fence.
        let f = || -> Result<(), ()> {
            let _guard = budget.fence();
            Err(())
        };
        assert!(f().is_err());
        assert!(!budget.fenced());
    }

    #[test]
    fn wait_fence_returns_when_lowered() {
        use std::sync::Arc;
        let budget = Arc::new(DramBudget::new(GIB));
        let guard = Box::new(budget.fence());

        let b = budget.clone();
        let waiter = std::thread::spawn(move || {
            b.wait_fence();
            b.used()
        });

        std::thread::sleep(std::time::Duration::from_millis(10));
        budget.commit_used(4096);
        drop(guard);
        assert_eq!(waiter.join().unwrap(), 4096);
    }
}
