// NUMA memory binding and node introspection.
//
// Placement and migration are both expressed through mbind(2) with
// MPOL_BIND and MOVE|STRICT semantics over a one-hot node mask; there is no
// custom page-table manipulation anywhere in the crate.

use crate::error::{Result, TmemError};
use std::fs;
use std::io;

/// Fast local tier.
pub const DRAM_NODE: u32 = 0;
/// Slow remote tier.
pub const REM_NODE: u32 = 1;

// Policy constants from linux/mempolicy.h; libc does not export them.
const MPOL_BIND: i32 = 2;
const MPOL_MF_STRICT: u32 = 1 << 0;
const MPOL_MF_MOVE: u32 = 1 << 1;

/// Seam between placement decisions and the kernel, so the migration and
/// allocation paths can be exercised without a NUMA machine.
pub trait MemoryBinder: Send + Sync {
    /// Bind `[addr, addr+len)` to `node`, moving already-faulted pages.
    fn bind(&self, addr: u64, len: u64, node: u32) -> Result<()>;
}

/// Production binder: mbind(2) with MPOL_BIND + MOVE + STRICT.
#[derive(Debug, Default)]
pub struct SysBinder;

impl MemoryBinder for SysBinder {
    fn bind(&self, addr: u64, len: u64, node: u32) -> Result<()> {
        let nodemask: u64 = 1 << node;
        // SAFETY: the mask buffer outlives the call; maxnode covers the mask.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                addr as usize,
                len as usize,
                MPOL_BIND,
                &nodemask as *const u64,
                64usize,
                MPOL_MF_MOVE | MPOL_MF_STRICT,
            )
        };
        if rc != 0 {
            return Err(TmemError::Bind(format!(
                "mbind(0x{addr:x}, {len}, node {node}): {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

/// Free bytes on a NUMA node, read from sysfs meminfo
/// (`Node <N> MemFree: <kB> kB`).
pub fn node_free_bytes(node: u32) -> Result<i64> {
    let path = format!("/sys/devices/system/node/node{node}/meminfo");
    let text = fs::read_to_string(&path)
        .map_err(|e| TmemError::Config(format!("{path}: {e}")))?;
    parse_node_free(&text)
        .ok_or_else(|| TmemError::Config(format!("{path}: no MemFree line")))
}

fn parse_node_free(meminfo: &str) -> Option<i64> {
    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        // "Node" "<N>" "MemFree:" "<kB>" "kB"
        if fields.next() != Some("Node") {
            continue;
        }
        let _node = fields.next()?;
        if fields.next() != Some("MemFree:") {
            continue;
        }
        let kb: i64 = fields.next()?.parse().ok()?;
        return Some(kb * 1024);
    }
    None
}
