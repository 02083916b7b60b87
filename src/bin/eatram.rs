// Node-filling helper: reserves memory on a NUMA node until only the
// requested amount is left free, then parks. Used to shrink a tier before
// starting a managed workload.
//
// Usage: eatram <MB_left_free> <node>

use std::process::exit;
use tiermem::sys::mm;
use tiermem::sys::numa::{self, MemoryBinder, SysBinder};

/// Extra megabytes on top of the requested slack; faulting the reservation
/// in consumes a little more than the mapping itself.
const SLACK_MB: u64 = 64;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <MB_left_free> <node>", args[0]);
        exit(1);
    }

    let leave_free_mb: u64 = args[1].parse().unwrap_or_else(|_| {
        eprintln!("bad MB value: {}", args[1]);
        exit(1);
    });
    let node: u32 = args[2].parse().unwrap_or_else(|_| {
        eprintln!("bad node: {}", args[2]);
        exit(1);
    });

    let leave_free = (leave_free_mb + SLACK_MB) << 20;
    let node_free = match numa::node_free_bytes(node) {
        Ok(free) => free as u64,
        Err(e) => {
            eprintln!("cannot read node {node} meminfo: {e}");
            exit(1);
        }
    };
    println!("node {node}: {node_free} bytes free, leaving {leave_free}");

    if node_free <= leave_free {
        println!("nothing to eat");
        loop {
            std::thread::park();
        }
    }
    let eat_size = (node_free - leave_free) as usize;
    println!("eating {eat_size} bytes on node {node}");

    let region = match mm::map_anon(eat_size) {
        Ok(ptr) => ptr,
        Err(e) => {
            eprintln!("mmap failed: {e}");
            exit(1);
        }
    };
    if let Err(e) = SysBinder.bind(region as u64, eat_size as u64, node) {
        eprintln!("bind to node {node} failed: {e}");
        exit(1);
    }

    // Fault every page in so the reservation is physical, not virtual.
    let page = 4096;
    for off in (0..eat_size).step_by(page) {
        // SAFETY: off stays inside the mapping.
        unsafe { region.add(off).write_volatile(1) };
    }
    println!("reservation resident; holding until killed");

    loop {
        std::thread::park();
    }
}
