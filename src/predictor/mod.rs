// Neighbor predictor.
//
// An online, bounded-memory approximator of recurring access sequences: a
// sliding history of recently sampled pages, a per-page neighbor set ranked
// by a weighted feature distance, and a lookahead walk that emits
// prefetch-promote requests for pages far enough in the future that
// migration can beat demand.

pub mod distance;
pub mod lookahead;

use crate::config::{Config, Lookahead, HISTORY_SIZE, MAX_NEIGHBORS};
use crate::engine::MigrationTiming;
use crate::mem::{PageArena, PageIdx};
use distance::{DistanceModel, Features};

pub struct Predictor {
    history: [Option<PageIdx>; HISTORY_SIZE],
    cursor: usize,
    model: DistanceModel,
    depth: u32,
    lookahead: Lookahead,
}

impl Predictor {
    pub fn new(cfg: &Config) -> Self {
        Self {
            history: [None; HISTORY_SIZE],
            cursor: 0,
            model: DistanceModel::new(cfg),
            depth: cfg.pred_depth,
            lookahead: cfg.lookahead,
        }
    }

    #[inline]
    pub fn model(&self) -> &DistanceModel {
        &self.model
    }

    /// Feed one resolved sample into the history window.
    ///
    /// The page about to leave the window (the oldest by last-access cycle)
    /// gets its neighbor set refined against the rest of the window first;
    /// it has seen the most future and its ranking is as informed as it
    /// will ever be.
    pub fn observe(&mut self, arena: &PageArena, page: PageIdx) {
        if self.history[self.cursor].is_none() {
            // Window still filling.
            self.history[self.cursor] = Some(page);
            self.cursor = (self.cursor + 1) % HISTORY_SIZE;
            return;
        }

        let (old_idx, old_page) = self.oldest(arena);
        self.refine_neighbors(arena, old_page);
        self.history[old_idx] = Some(page);
    }

    /// Slot index and page of the history entry with the minimum
    /// last-access cycle. A momentarily contended page cannot be chosen
    /// this round.
    fn oldest(&self, arena: &PageArena) -> (usize, PageIdx) {
        let mut best_i = self.cursor;
        let mut best_page = self.history[self.cursor].unwrap();
        let mut best_cyc = u64::MAX;
        for (i, entry) in self.history.iter().enumerate() {
            let Some(idx) = *entry else { continue };
            let cyc = arena
                .slot(idx)
                .try_meta()
                .map(|m| m.cyc_accessed)
                .unwrap_or(u64::MAX);
            if cyc < best_cyc {
                best_cyc = cyc;
                best_i = i;
                best_page = idx;
            }
        }
        (best_i, best_page)
    }

    /// Re-rank `old`'s neighbor set against every other page in the window.
    fn refine_neighbors(&mut self, arena: &PageArena, old: PageIdx) {
        let old_slot = arena.slot(old);
        let Some(old_feat) = old_slot.try_meta().map(|m| Features::of(&m)) else {
            return;
        };

        // Snapshot peer features one lock at a time; contended peers are
        // skipped this round.
        let mut peers: Vec<(PageIdx, Features)> = Vec::with_capacity(HISTORY_SIZE);
        for entry in self.history.iter().flatten() {
            if *entry == old {
                continue;
            }
            if let Some(meta) = arena.slot(*entry).try_meta() {
                peers.push((*entry, Features::of(&meta)));
            }
        }

        let Some(mut meta) = old_slot.try_meta() else {
            return;
        };

        // Age the incumbents before this round's refresh.
        for n in meta.neighbors.iter_mut() {
            n.distance *= 1.01;
        }

        for (peer, feat) in peers {
            let dist = self.model.observe(&old_feat, &feat);
            debug_assert!(dist != 0.0, "distinct pages at zero distance");
            if dist == 0.0 {
                continue;
            }

            // Existing entry or empty slot wins outright; otherwise the
            // farthest incumbent is the replacement candidate.
            let mut target = 0usize;
            let mut refresh = false;
            for (j, n) in meta.neighbors.iter().enumerate() {
                match n.page {
                    Some(p) if p == peer => {
                        target = j;
                        refresh = true;
                        break;
                    }
                    None => {
                        target = j;
                        refresh = true;
                        break;
                    }
                    Some(_) => {
                        if n.distance > meta.neighbors[target].distance {
                            target = j;
                        }
                    }
                }
            }

            if refresh || dist < meta.neighbors[target].distance {
                let n = &mut meta.neighbors[target];
                n.page = Some(peer);
                n.distance = dist;
                n.time_diff = feat.cyc.saturating_sub(old_feat.cyc);
            }
        }
    }

    /// Emit prefetch-promote candidates reachable from `from`. Suppressed
    /// entirely under throttle backpressure.
    pub fn predict(
        &self,
        arena: &PageArena,
        from: PageIdx,
        hot_len: usize,
        timing: &MigrationTiming,
        backpressured: bool,
        out: &mut Vec<PageIdx>,
    ) {
        if backpressured {
            return;
        }

        let threshold = self.model.bot();
        let horizon = timing.move_estimate() + timing.queue_estimate(hot_len);
        let budget = self.depth as usize * MAX_NEIGHBORS;

        match self.lookahead {
            Lookahead::Bfs => {
                lookahead::bfs(arena, from, self.depth, threshold, horizon, budget, out)
            }
            Lookahead::Dfs => {
                lookahead::dfs(arena, from, self.depth, threshold, horizon, out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Tier;

    fn predictor() -> Predictor {
        Predictor::new(&Config::default())
    }

    /// A page whose features make distances easy to reason about.
    fn sampled_page(arena: &PageArena, va: u64, cyc: u64) -> PageIdx {
        let idx = arena.alloc();
        arena.slot(idx).reinit(va, va, 4096, Tier::Rem);
        let mut meta = arena.slot(idx).meta();
        meta.cyc_accessed = cyc;
        meta.ip = 0x400000;
        idx
    }

    #[test]
    fn history_fills_before_any_refinement() {
        let arena = PageArena::new();
        let mut pred = predictor();

        let pages: Vec<_> = (0..HISTORY_SIZE as u64)
            .map(|i| sampled_page(&arena, 0x1000 * (i + 1), 100 * (i + 1)))
            .collect();
        for &p in &pages {
            pred.observe(&arena, p);
        }

        // Window just filled; nothing evicted, so no neighbors assigned yet.
        for &p in &pages {
            let meta = arena.slot(p).meta();
            assert!(meta.neighbors.iter().all(|n| n.page.is_none()));
        }
    }

    #[test]
    fn eviction_refines_the_oldest_entry() {
        let arena = PageArena::new();
        let mut pred = predictor();

        let pages: Vec<_> = (0..HISTORY_SIZE as u64)
            .map(|i| sampled_page(&arena, 0x1000 * (i + 1), 100 * (i + 1)))
            .collect();
        for &p in &pages {
            pred.observe(&arena, p);
        }

        let newcomer = sampled_page(&arena, 0xff000, 10_000);
        pred.observe(&arena, newcomer);

        // pages[0] had the lowest cycle stamp: it was refined and evicted.
        let meta = arena.slot(pages[0]).meta();
        let filled = meta.neighbors.iter().filter(|n| n.page.is_some()).count();
        assert_eq!(filled, MAX_NEIGHBORS);
        // Neighbors carry forward time offsets relative to the old page.
        for n in meta.neighbors.iter() {
            assert!(n.time_diff > 0);
            assert!(n.distance > 0.0);
        }
    }

    #[test]
    fn closer_peers_displace_the_farthest_neighbor() {
        let arena = PageArena::new();
        let mut pred = predictor();

        // Fill the window with pages far from each other, then evict while
        // a much closer peer is present.
        let far_pages: Vec<_> = (0..HISTORY_SIZE as u64)
            .map(|i| sampled_page(&arena, 0x100_0000 * (i + 1), 1_000_000 * (i + 1)))
            .collect();
        for &p in &far_pages {
            pred.observe(&arena, p);
        }
        pred.observe(&arena, sampled_page(&arena, 0xfff_0000, 99_000_000));

        let meta = arena.slot(far_pages[0]).meta();
        let neighbors: Vec<_> = meta.neighbors.iter().filter_map(|n| n.page).collect();
        // The nearest peers in feature space won the slots: the window's
        // closest pages to far_pages[0] are its immediate successors.
        assert!(neighbors.contains(&far_pages[1]));
        assert!(neighbors.contains(&far_pages[2]));
    }

    #[test]
    fn backpressure_suppresses_predictions() {
        let arena = PageArena::new();
        let pred = predictor();
        let timing = MigrationTiming::new();

        let peer = sampled_page(&arena, 0x1000, 100);
        let from = sampled_page(&arena, 0x2000, 200);
        arena.slot(from).meta().neighbors[0] = crate::mem::page::NeighborSlot {
            page: Some(peer),
            distance: 1e-6,
            time_diff: u64::MAX / 2,
        };

        let mut out = Vec::new();
        pred.predict(&arena, from, 0, &timing, true, &mut out);
        assert!(out.is_empty());

        // The same walk emits once backpressure clears.
        pred.predict(&arena, from, 0, &timing, false, &mut out);
        assert_eq!(out, vec![peer]);
    }
}

