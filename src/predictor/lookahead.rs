// Lookahead walks over the neighbor graph.
//
// Both walks explore edges whose distance is under the caller's threshold
// and emit a page only when its cumulative time offset clears the horizon
// (expected migration latency): a prefetch that cannot land before demand
// is wasted bandwidth.

use crate::config::MAX_NEIGHBORS;
use crate::mem::page::NeighborSlot;
use crate::mem::{PageArena, PageIdx};
use std::collections::VecDeque;

/// Bound on outstanding BFS nodes; the walk degrades to partial coverage
/// rather than growing without limit.
const BFS_QUEUE_MAX: usize = 256;

/// Copy a page's neighbor set without blocking; a contended page
/// contributes nothing this walk.
fn neighbors_of(arena: &PageArena, page: PageIdx) -> Option<[NeighborSlot; MAX_NEIGHBORS]> {
    arena.slot(page).try_meta().map(|m| m.neighbors)
}

/// Breadth-first lookahead, up to `budget` emissions.
pub fn bfs(
    arena: &PageArena,
    from: PageIdx,
    max_depth: u32,
    threshold: f64,
    horizon: u64,
    budget: usize,
    out: &mut Vec<PageIdx>,
) {
    let mut queue: VecDeque<(PageIdx, u32, u64)> = VecDeque::new();
    queue.push_back((from, 0, 0));

    while let Some((page, depth, tot_time)) = queue.pop_front() {
        if out.len() >= budget {
            return;
        }
        if depth >= max_depth {
            continue;
        }
        let Some(neighbors) = neighbors_of(arena, page) else {
            continue;
        };

        for n in neighbors.iter() {
            let Some(peer) = n.page else { continue };
            if n.distance == 0.0 || n.distance >= threshold {
                continue;
            }

            let new_time = tot_time + n.time_diff;
            if new_time > horizon {
                out.push(peer);
                if out.len() >= budget {
                    return;
                }
            }

            if queue.len() < BFS_QUEUE_MAX {
                queue.push_back((peer, depth + 1, new_time));
            }
        }
    }
}

/// Depth-first variant: follow the closest qualifying neighbor chain.
pub fn dfs(
    arena: &PageArena,
    from: PageIdx,
    max_depth: u32,
    threshold: f64,
    horizon: u64,
    out: &mut Vec<PageIdx>,
) {
    let mut cur = from;
    let mut tot_time: u64 = 0;

    for _ in 0..max_depth {
        let Some(neighbors) = neighbors_of(arena, cur) else {
            return;
        };

        let mut closest: Option<&NeighborSlot> = None;
        for n in neighbors.iter() {
            if n.page.is_none() || n.distance == 0.0 || n.distance >= threshold {
                continue;
            }
            if closest.map_or(true, |c| n.distance < c.distance) {
                closest = Some(n);
            }
            if tot_time + n.time_diff > horizon {
                out.push(n.page.unwrap());
            }
        }

        let Some(next) = closest else { return };
        cur = next.page.unwrap();
        tot_time += next.time_diff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{PageArena, Tier};

    /// Build a page with the given neighbor edges `(peer, distance, time)`.
    fn page_with_neighbors(
        arena: &PageArena,
        va: u64,
        edges: &[(PageIdx, f64, u64)],
    ) -> PageIdx {
        let idx = arena.alloc();
        arena.slot(idx).reinit(va, va, 4096, Tier::Rem);
        let mut meta = arena.slot(idx).meta();
        for (j, (peer, dist, time)) in edges.iter().enumerate() {
            meta.neighbors[j] = NeighborSlot {
                page: Some(*peer),
                distance: *dist,
                time_diff: *time,
            };
        }
        idx
    }

    fn leaf(arena: &PageArena, va: u64) -> PageIdx {
        let idx = arena.alloc();
        arena.slot(idx).reinit(va, va, 4096, Tier::Rem);
        idx
    }

    #[test]
    fn bfs_emits_only_past_the_horizon() {
        let arena = PageArena::new();
        let near = leaf(&arena, 0x1000);
        let far = leaf(&arena, 0x2000);
        let root = page_with_neighbors(
            &arena,
            0x3000,
            &[(near, 0.5, 10), (far, 0.5, 1000)],
        );

        let mut out = Vec::new();
        bfs(&arena, root, 2, 1.0, 100, 8, &mut out);
        // `near` is due before migration could finish; only `far` pays off.
        assert_eq!(out, vec![far]);
    }

    #[test]
    fn bfs_respects_threshold_and_budget() {
        let arena = PageArena::new();
        let close = leaf(&arena, 0x1000);
        let distant = leaf(&arena, 0x2000);
        let root = page_with_neighbors(
            &arena,
            0x3000,
            &[(close, 0.5, 500), (distant, 5.0, 500)],
        );

        let mut out = Vec::new();
        bfs(&arena, root, 1, 1.0, 100, 8, &mut out);
        assert_eq!(out, vec![close]);

        // Budget of zero emits nothing.
        let mut out = Vec::new();
        bfs(&arena, root, 1, 1.0, 100, 0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn bfs_walks_transitive_neighbors() {
        let arena = PageArena::new();
        let hop2 = leaf(&arena, 0x1000);
        let hop1 = page_with_neighbors(&arena, 0x2000, &[(hop2, 0.5, 400)]);
        let root = page_with_neighbors(&arena, 0x3000, &[(hop1, 0.5, 400)]);

        let mut out = Vec::new();
        bfs(&arena, root, 2, 1.0, 600, 8, &mut out);
        // hop1 at t=400 misses the horizon; hop2 at t=800 clears it.
        assert_eq!(out, vec![hop2]);

        // Depth 1 cannot reach hop2.
        let mut out = Vec::new();
        bfs(&arena, root, 1, 1.0, 600, 8, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn dfs_follows_closest_chain() {
        let arena = PageArena::new();
        let deep = leaf(&arena, 0x1000);
        let close = page_with_neighbors(&arena, 0x2000, &[(deep, 0.2, 900)]);
        let far = leaf(&arena, 0x4000);
        let root = page_with_neighbors(
            &arena,
            0x3000,
            &[(close, 0.3, 200), (far, 0.9, 200)],
        );

        let mut out = Vec::new();
        dfs(&arena, root, 2, 1.0, 500, &mut out);
        // Depth 0: neither neighbor clears the 500-cycle horizon; the chain
        // follows `close` (0.3 < 0.9) and finds `deep` at t=1100.
        assert_eq!(out, vec![deep]);
    }
}
