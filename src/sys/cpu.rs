// CPU affinity for the worker threads.

use crate::error::{Result, TmemError};
use std::io;

/// Pin the calling thread to a single CPU. The requested CPU is clamped to
/// the machine so undersized boxes still run (the workers just share cores).
pub fn pin_current_thread(cpu: usize) -> Result<()> {
    let ncpus = num_cpus::get();
    let cpu = cpu % ncpus;

    // SAFETY: cpuset is a plain value fully initialized by CPU_ZERO.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(TmemError::Affinity(format!(
                "sched_setaffinity(cpu {cpu}): {}",
                io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_to_cpu_zero() {
        // CPU 0 always exists.
        pin_current_thread(0).unwrap();
    }

    #[test]
    fn oversized_cpu_wraps() {
        pin_current_thread(num_cpus::get() * 3).unwrap();
    }
}
