// Monotonic wall clock and cycle counter.

use std::time::Instant;

use once_cell::sync::Lazy;

static START: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since the first call in this process.
#[inline]
pub fn monotonic_ns() -> u64 {
    START.elapsed().as_nanos() as u64
}

/// Seconds elapsed between two monotonic-ns readings.
#[inline]
pub fn elapsed_secs(start_ns: u64, end_ns: u64) -> f64 {
    end_ns.saturating_sub(start_ns) as f64 / 1e9
}

/// High-resolution cycle counter. Serializing variant (rdtscp) so the read
/// orders after prior loads, which the cooling epoch relies on.
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn rdtscp() -> u64 {
    let mut aux = 0u32;
    // SAFETY: rdtscp has no memory side effects; aux receives IA32_TSC_AUX.
    unsafe { core::arch::x86_64::__rdtscp(&mut aux) }
}

/// Fallback for non-x86 targets: monotonic nanoseconds stand in for cycles.
#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub fn rdtscp() -> u64 {
    monotonic_ns()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_counter_is_monotone() {
        let a = rdtscp();
        let b = rdtscp();
        assert!(b >= a);
    }

    #[test]
    fn elapsed_is_nonnegative() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(elapsed_secs(a, b) >= 0.0);
        assert_eq!(elapsed_secs(b + 1_000_000, b), 0.0);
    }
}
