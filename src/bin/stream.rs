// STREAM-style triad workload for exercising the manager.
//
// Three arrays of the requested size; each iteration runs a sequential
// triad pass followed by a short random-walk pass that concentrates heat
// on a subset of pages. Per-iteration bandwidth is printed so promotion
// effects show up directly.
//
// Usage: stream <array_MB> <iterations>

use rand::prelude::*;
use std::process::exit;
use std::time::Instant;

const SCALAR: f64 = 3.0;

/// Allocate through the libc mmap symbol so a preloaded manager sees the
/// request.
fn map_array(len: usize) -> *mut f64 {
    // SAFETY: fresh anonymous mapping, fully owned by this process.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len * std::mem::size_of::<f64>(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        eprintln!("mmap failed: {}", std::io::Error::last_os_error());
        exit(1);
    }
    ptr as *mut f64
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <array_MB> <iterations>", args[0]);
        exit(1);
    }
    let array_mb: usize = args[1].parse().unwrap_or_else(|_| {
        eprintln!("bad array size: {}", args[1]);
        exit(1);
    });
    let iterations: usize = args[2].parse().unwrap_or_else(|_| {
        eprintln!("bad iteration count: {}", args[2]);
        exit(1);
    });

    let n = array_mb * (1 << 20) / std::mem::size_of::<f64>();
    let a = map_array(n);
    let b = map_array(n);
    let c = map_array(n);

    // SAFETY: each pointer covers n elements; indices stay in range below.
    unsafe {
        for i in 0..n {
            *b.add(i) = 2.0;
            *c.add(i) = 0.5;
        }

        let mut rng = rand::rng();
        let hot_span = (n / 16).max(1);

        for iter in 0..iterations {
            let start = Instant::now();
            for i in 0..n {
                *a.add(i) = *b.add(i) + SCALAR * *c.add(i);
            }
            // Random walk over a small hot region.
            let mut acc = 0.0f64;
            for _ in 0..hot_span {
                let i = rng.random_range(0..hot_span);
                acc += *a.add(i);
            }
            std::hint::black_box(acc);

            let secs = start.elapsed().as_secs_f64();
            let bytes = 3 * n * std::mem::size_of::<f64>();
            println!(
                "iter {iter}: {:.3}s, {:.2} GB/s",
                secs,
                bytes as f64 / secs / 1e9
            );
        }

        // Spot-check the triad result.
        assert_eq!(*a.add(0), 3.5);
        assert_eq!(*a.add(n - 1), 3.5);
    }
}
