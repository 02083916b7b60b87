// Platform primitives: perf-event sampling, NUMA memory binding, CPU
// affinity, and time sources. Everything below issues raw syscalls through
// libc; the rest of the crate never touches the kernel directly.

pub mod cpu;
pub mod mm;
pub mod numa;
pub mod perf;
pub mod time;
